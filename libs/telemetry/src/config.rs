use std::env;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelemetryProtocol {
    Grpc,
    HttpProtobuf,
}

impl TelemetryProtocol {
    fn parse(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "http" | "http/protobuf" => TelemetryProtocol::HttpProtobuf,
            _ => TelemetryProtocol::Grpc,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub endpoint: String,
    pub protocol: TelemetryProtocol,
    pub service_name: String,
    pub service_version: String,
    pub json_logs: bool,
    pub enabled: bool,
}

impl TelemetryConfig {
    /// Plain-text logs, no exporter. Handy for tests and dry runs.
    pub fn local(service_name: &str) -> Self {
        Self {
            endpoint: String::new(),
            protocol: TelemetryProtocol::Grpc,
            service_name: service_name.to_string(),
            service_version: String::new(),
            json_logs: false,
            enabled: false,
        }
    }

    pub fn from_env(default_service_name: &str, default_service_version: &str) -> Self {
        let endpoint = env::var("OTEL_EXPORTER_OTLP_ENDPOINT").unwrap_or_default();
        let protocol = env::var("OTEL_EXPORTER_OTLP_PROTOCOL")
            .map(|v| TelemetryProtocol::parse(&v))
            .unwrap_or(TelemetryProtocol::Grpc);
        let service_name =
            env::var("OTEL_SERVICE_NAME").unwrap_or_else(|_| default_service_name.to_string());
        let service_version = env::var("OTEL_SERVICE_VERSION")
            .unwrap_or_else(|_| default_service_version.to_string());
        let json_logs = env::var("LOG_FORMAT")
            .map(|v| json_format(&v))
            .unwrap_or(false);
        let enabled = env::var("ENABLE_OTEL")
            .map(|v| truthy(&v))
            .unwrap_or(false);

        Self {
            endpoint,
            protocol,
            service_name,
            service_version,
            json_logs,
            enabled,
        }
    }

    pub fn exporter_enabled(&self) -> bool {
        self.enabled && !self.endpoint.trim().is_empty()
    }
}

fn json_format(value: &str) -> bool {
    !matches!(
        value.to_ascii_lowercase().as_str(),
        "text" | "pretty" | "plain" | ""
    )
}

fn truthy(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
