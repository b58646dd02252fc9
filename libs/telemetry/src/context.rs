/// Label set attached to every metric a generator run records.
#[derive(Debug, Clone)]
pub struct TelemetryLabels {
    pub generator: String,
    pub destination: Option<String>,
    pub kind: Option<String>,
    pub extra: Vec<(String, String)>,
}

impl TelemetryLabels {
    pub fn new(generator: impl Into<String>) -> Self {
        Self {
            generator: generator.into(),
            destination: None,
            kind: None,
            extra: Vec::new(),
        }
    }

    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = Some(destination.into());
        self
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn tags(&self) -> Vec<(String, String)> {
        let mut tags = Vec::with_capacity(3 + self.extra.len());
        tags.push(("generator".into(), self.generator.clone()));
        if let Some(destination) = &self.destination {
            tags.push(("destination".into(), destination.clone()));
        }
        if let Some(kind) = &self.kind {
            tags.push(("kind".into(), kind.clone()));
        }
        for (key, value) in &self.extra {
            tags.push((key.clone(), value.clone()));
        }
        tags
    }
}
