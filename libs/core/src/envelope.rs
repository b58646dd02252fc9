//! Per-message envelopes: an immutable endpoint template combined with fresh
//! identifiers, timestamps and (for failed messages) exception metadata.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use datagen_bus::OutgoingMessage;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{Duration, OffsetDateTime, UtcOffset};
use uuid::Uuid;

use crate::exceptions::ExceptionContext;

/// Well-known header keys understood by the monitoring backend.
pub mod headers {
    pub const MESSAGE_ID: &str = "NServiceBus.MessageId";
    pub const CORRELATION_ID: &str = "NServiceBus.CorrelationId";
    pub const CONVERSATION_ID: &str = "NServiceBus.ConversationId";
    pub const MESSAGE_INTENT: &str = "NServiceBus.MessageIntent";
    pub const TIME_SENT: &str = "NServiceBus.TimeSent";
    pub const PROCESSING_STARTED: &str = "NServiceBus.ProcessingStarted";
    pub const PROCESSING_ENDED: &str = "NServiceBus.ProcessingEnded";
    pub const CONTENT_TYPE: &str = "NServiceBus.ContentType";
    pub const ENCLOSED_MESSAGE_TYPES: &str = "NServiceBus.EnclosedMessageTypes";
    pub const ORIGINATING_ENDPOINT: &str = "NServiceBus.OriginatingEndpoint";
    pub const ORIGINATING_MACHINE: &str = "NServiceBus.OriginatingMachine";
    pub const PROCESSING_ENDPOINT: &str = "NServiceBus.ProcessingEndpoint";
    pub const PROCESSING_MACHINE: &str = "NServiceBus.ProcessingMachine";
    pub const HOST_ID: &str = "$.diagnostics.hostid";
    pub const HOST_DISPLAY_NAME: &str = "$.diagnostics.hostdisplayname";
    pub const REPLY_TO_ADDRESS: &str = "NServiceBus.ReplyToAddress";
    pub const VERSION: &str = "NServiceBus.Version";
    pub const FAILED_QUEUE: &str = "NServiceBus.FailedQ";
    pub const TIME_OF_FAILURE: &str = "NServiceBus.TimeOfFailure";
    pub const EXCEPTION_TYPE: &str = "NServiceBus.ExceptionInfo.ExceptionType";
    pub const EXCEPTION_MESSAGE: &str = "NServiceBus.ExceptionInfo.Message";
    pub const EXCEPTION_SOURCE: &str = "NServiceBus.ExceptionInfo.Source";
    pub const EXCEPTION_STACK_TRACE: &str = "NServiceBus.ExceptionInfo.StackTrace";
}

const WIRE_TIME: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]:[subsecond digits:6] Z");

const ENCLOSED_TYPE_NAME: &str =
    "DataGenerator.MyMessage, DataGenerator, Version=1.0.0.0, Culture=neutral, PublicKeyToken=null";
const ERROR_HOST_ID: Uuid = uuid::uuid!("ac909642-c337-43a8-a593-e8da2418d3cf");
const AUDIT_HOST_ID: Uuid = uuid::uuid!("5c85fd81-8a4d-47ce-99bb-0800caf85ca8");
const TRANSPORT_VERSION: &str = "7.3.0";

/// `yyyy-MM-dd HH:mm:ss:ffffff Z`, always in UTC.
pub fn to_wire_time(ts: OffsetDateTime) -> String {
    let utc = ts.to_offset(UtcOffset::UTC);
    utc.format(WIRE_TIME)
        .unwrap_or_else(|_| utc.unix_timestamp().to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageIntent {
    Send,
}

impl MessageIntent {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageIntent::Send => "Send",
        }
    }
}

/// Endpoint identity shared by every message of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvelopeTemplate {
    pub destination: String,
    pub enclosed_type_name: String,
    pub content_type: String,
    pub origin_endpoint: String,
    pub origin_machine: String,
    pub processing_endpoint: String,
    pub processing_machine: String,
    pub host_id: Uuid,
    pub host_display_name: String,
    pub reply_to: String,
    pub failed_queue: Option<String>,
    pub version: String,
}

impl EnvelopeTemplate {
    /// Template where the endpoint both originated and processed the message.
    pub fn for_endpoint(
        endpoint: &str,
        machine: &str,
        host_id: Uuid,
        destination: &str,
    ) -> Self {
        Self {
            destination: destination.to_string(),
            enclosed_type_name: ENCLOSED_TYPE_NAME.to_string(),
            content_type: "text/xml".to_string(),
            origin_endpoint: endpoint.to_string(),
            origin_machine: machine.to_string(),
            processing_endpoint: endpoint.to_string(),
            processing_machine: machine.to_string(),
            host_id,
            host_display_name: endpoint.to_string(),
            reply_to: format!("{endpoint}@{machine}"),
            failed_queue: None,
            version: TRANSPORT_VERSION.to_string(),
        }
    }

    pub fn error_generator() -> Self {
        Self::for_endpoint(
            "ErrorDataGenerator",
            "ErrorDataGeneratorMachine",
            ERROR_HOST_ID,
            "error",
        )
        .with_failed_queue("errordatagenerator")
    }

    pub fn audit_generator() -> Self {
        Self::for_endpoint(
            "AuditDataGenerator",
            "AuditDataGeneratorMachine",
            AUDIT_HOST_ID,
            "audit",
        )
    }

    pub fn with_failed_queue(mut self, queue: impl Into<String>) -> Self {
        self.failed_queue = Some(queue.into());
        self
    }

    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = destination.into();
        self
    }
}

/// What kind of record the message simulates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeStyle {
    /// Successfully processed; processing timestamps are back-dated.
    Audit,
    /// Never processed successfully; carries the failure context.
    Failed(Arc<ExceptionContext>),
}

/// Per-message values layered over the template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvelopeOverrides {
    pub message_id: Uuid,
    pub conversation_id: Uuid,
    pub now: OffsetDateTime,
    pub style: EnvelopeStyle,
}

impl EnvelopeOverrides {
    /// Fresh, independent message and conversation ids.
    pub fn fresh(now: OffsetDateTime, style: EnvelopeStyle) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            conversation_id: Uuid::new_v4(),
            now,
            style,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionHeaders {
    pub type_name: String,
    pub message: String,
    pub stack_trace: String,
    pub source: String,
}

impl From<&ExceptionContext> for ExceptionHeaders {
    fn from(ctx: &ExceptionContext) -> Self {
        Self {
            type_name: ctx.type_name().to_string(),
            message: ctx.message().to_string(),
            stack_trace: ctx.full_text(),
            source: ctx.source().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEnvelope {
    pub message_id: Uuid,
    pub correlation_id: Uuid,
    pub conversation_id: Uuid,
    pub intent: MessageIntent,
    pub time_sent: OffsetDateTime,
    pub processing_started: Option<OffsetDateTime>,
    pub processing_ended: Option<OffsetDateTime>,
    pub time_of_failure: Option<OffsetDateTime>,
    pub content_type: String,
    pub enclosed_type_name: String,
    pub origin_endpoint: String,
    pub origin_machine: String,
    pub processing_endpoint: String,
    pub processing_machine: String,
    pub host_id: Uuid,
    pub host_display_name: String,
    pub reply_to: String,
    pub version: String,
    pub destination: String,
    pub failed_queue: Option<String>,
    pub exception_headers: Option<ExceptionHeaders>,
}

/// Combines the template with the overrides. The result owns all of its data.
pub fn build(template: &EnvelopeTemplate, overrides: &EnvelopeOverrides) -> MessageEnvelope {
    let now = overrides.now;
    let (time_sent, processing_started, processing_ended, time_of_failure, failed_queue, exception) =
        match &overrides.style {
            EnvelopeStyle::Audit => (
                now - Duration::seconds(3),
                Some(now - Duration::seconds(2)),
                Some(now - Duration::seconds(1)),
                None,
                None,
                None,
            ),
            EnvelopeStyle::Failed(ctx) => (
                now,
                None,
                None,
                Some(now),
                template.failed_queue.clone(),
                Some(ExceptionHeaders::from(ctx.as_ref())),
            ),
        };

    MessageEnvelope {
        message_id: overrides.message_id,
        correlation_id: overrides.message_id,
        conversation_id: overrides.conversation_id,
        intent: MessageIntent::Send,
        time_sent,
        processing_started,
        processing_ended,
        time_of_failure,
        content_type: template.content_type.clone(),
        enclosed_type_name: template.enclosed_type_name.clone(),
        origin_endpoint: template.origin_endpoint.clone(),
        origin_machine: template.origin_machine.clone(),
        processing_endpoint: template.processing_endpoint.clone(),
        processing_machine: template.processing_machine.clone(),
        host_id: template.host_id,
        host_display_name: template.host_display_name.clone(),
        reply_to: template.reply_to.clone(),
        version: template.version.clone(),
        destination: template.destination.clone(),
        failed_queue,
        exception_headers: exception,
    }
}

impl MessageEnvelope {
    pub fn to_headers(&self) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        let mut put = |key: &str, value: String| {
            map.insert(key.to_string(), value);
        };
        put(headers::MESSAGE_ID, self.message_id.to_string());
        put(headers::CORRELATION_ID, self.correlation_id.to_string());
        put(headers::CONVERSATION_ID, self.conversation_id.to_string());
        put(headers::MESSAGE_INTENT, self.intent.as_str().to_string());
        put(headers::TIME_SENT, to_wire_time(self.time_sent));
        put(headers::CONTENT_TYPE, self.content_type.clone());
        put(
            headers::ENCLOSED_MESSAGE_TYPES,
            self.enclosed_type_name.clone(),
        );
        put(headers::ORIGINATING_ENDPOINT, self.origin_endpoint.clone());
        put(headers::ORIGINATING_MACHINE, self.origin_machine.clone());
        put(headers::PROCESSING_ENDPOINT, self.processing_endpoint.clone());
        put(headers::PROCESSING_MACHINE, self.processing_machine.clone());
        put(headers::HOST_ID, self.host_id.simple().to_string());
        put(headers::HOST_DISPLAY_NAME, self.host_display_name.clone());
        put(headers::REPLY_TO_ADDRESS, self.reply_to.clone());
        put(headers::VERSION, self.version.clone());
        if let Some(ts) = self.processing_started {
            put(headers::PROCESSING_STARTED, to_wire_time(ts));
        }
        if let Some(ts) = self.processing_ended {
            put(headers::PROCESSING_ENDED, to_wire_time(ts));
        }
        if let Some(ts) = self.time_of_failure {
            put(headers::TIME_OF_FAILURE, to_wire_time(ts));
        }
        if let Some(queue) = &self.failed_queue {
            put(headers::FAILED_QUEUE, queue.clone());
        }
        if let Some(exception) = &self.exception_headers {
            put(headers::EXCEPTION_TYPE, exception.type_name.clone());
            put(headers::EXCEPTION_MESSAGE, exception.message.clone());
            put(headers::EXCEPTION_SOURCE, exception.source.clone());
            put(headers::EXCEPTION_STACK_TRACE, exception.stack_trace.clone());
        }
        map
    }

    pub fn into_outgoing(self, body: Bytes) -> OutgoingMessage {
        OutgoingMessage {
            message_id: self.message_id.to_string(),
            headers: self.to_headers(),
            destination: self.destination,
            body,
        }
    }
}
