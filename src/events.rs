// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Example domain event contracts exchanged over the broker. The transport
//! does not enforce these shapes, any serializable payload can be published.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Optional metadata carried next to an event payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl EventMetadata {
    /// Metadata stamped with the current time and the emitting service.
    pub fn now(source: &str) -> Self {
        EventMetadata {
            timestamp: Some(Utc::now()),
            source: Some(source.to_owned()),
            ..Default::default()
        }
    }

    pub fn correlation_id(mut self, id: &str) -> Self {
        self.correlation_id = Some(id.to_owned());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserCreated {
    pub user_id: String,
    pub email: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDeleted {
    pub user_id: String,
}

/// User lifecycle events, discriminated by the `type` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum UserEvent {
    #[serde(rename = "USER_CREATED")]
    UserCreated {
        data: UserCreated,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<EventMetadata>,
    },
    #[serde(rename = "USER_DELETED")]
    UserDeleted {
        data: UserDeleted,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<EventMetadata>,
    },
}

impl UserEvent {
    pub fn created(user_id: &str, email: &str, name: &str) -> Self {
        UserEvent::UserCreated {
            data: UserCreated {
                user_id: user_id.to_owned(),
                email: email.to_owned(),
                name: name.to_owned(),
            },
            metadata: None,
        }
    }

    pub fn deleted(user_id: &str) -> Self {
        UserEvent::UserDeleted {
            data: UserDeleted {
                user_id: user_id.to_owned(),
            },
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, meta: EventMetadata) -> Self {
        match &mut self {
            UserEvent::UserCreated { metadata, .. } | UserEvent::UserDeleted { metadata, .. } => {
                *metadata = Some(meta)
            }
        }
        self
    }

    pub fn kind(&self) -> &'static str {
        match self {
            UserEvent::UserCreated { .. } => "USER_CREATED",
            UserEvent::UserDeleted { .. } => "USER_DELETED",
        }
    }

    pub fn metadata(&self) -> Option<&EventMetadata> {
        match self {
            UserEvent::UserCreated { metadata, .. } | UserEvent::UserDeleted { metadata, .. } => {
                metadata.as_ref()
            }
        }
    }
}
