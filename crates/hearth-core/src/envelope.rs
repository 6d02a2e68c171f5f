//! Broadcast event contract.
//!
//! [`EventEnvelope`] is the only message the server pushes to WebSocket
//! clients:
//!
//! ```json
//! { "family_id": "<uuid>", "event_type": "user_created_task", "data": { ... } }
//! ```
//!
//! The `event_type` discriminant and the shape of `data` come from a single
//! [`EventPayload`] variant, so they cannot disagree. Envelopes are built
//! through the named constructors and are read-only afterwards.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::ids::FamilyId;
use crate::views::{
    Deleted, DoneStatus, PurchasedStatus, ShoppingListItemView, ShoppingListView, TaskView,
};

/// Event types pushed to family members.
///
/// The string values are part of the wire format; clients switch on them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    // ── Tasks ────────────────────────────────────────────────────────
    /// A task was created.
    UserCreatedTask,
    /// A task was edited.
    UserUpdatedTask,
    /// A task was marked done or not done.
    UserUpdatedTaskDoneStatus,
    /// A task was deleted.
    UserDeletedTask,

    // ── Shopping lists ───────────────────────────────────────────────
    /// A shopping list was created.
    UserCreatedShoppingList,
    /// A shopping list was renamed.
    UserUpdatedShoppingList,
    /// A shopping list was deleted.
    UserDeletedShoppingList,

    // ── Shopping list items ──────────────────────────────────────────
    /// An item was added to a shopping list.
    UserCreatedShoppingListItem,
    /// An item was marked purchased or not purchased.
    UserUpdatedShoppingListItemPurchasedStatus,
}

/// All event type variants, for exhaustive testing.
pub const ALL_EVENT_TYPES: &[EventType] = &[
    EventType::UserCreatedTask,
    EventType::UserUpdatedTask,
    EventType::UserUpdatedTaskDoneStatus,
    EventType::UserDeletedTask,
    EventType::UserCreatedShoppingList,
    EventType::UserUpdatedShoppingList,
    EventType::UserDeletedShoppingList,
    EventType::UserCreatedShoppingListItem,
    EventType::UserUpdatedShoppingListItemPurchasedStatus,
];

impl EventType {
    /// Wire string of this event type.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UserCreatedTask => "user_created_task",
            Self::UserUpdatedTask => "user_updated_task",
            Self::UserUpdatedTaskDoneStatus => "user_updated_task_done_status",
            Self::UserDeletedTask => "user_deleted_task",
            Self::UserCreatedShoppingList => "user_created_shopping_list",
            Self::UserUpdatedShoppingList => "user_updated_shopping_list",
            Self::UserDeletedShoppingList => "user_deleted_shopping_list",
            Self::UserCreatedShoppingListItem => "user_created_shopping_list_item",
            Self::UserUpdatedShoppingListItemPurchasedStatus => {
                "user_updated_shopping_list_item_purchased_status"
            }
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed `data` of an envelope, tagged by its event type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event_type", content = "data", rename_all = "snake_case")]
pub enum EventPayload {
    /// Full task view.
    UserCreatedTask(TaskView),
    /// Full task view.
    UserUpdatedTask(TaskView),
    /// `{id, done}`.
    UserUpdatedTaskDoneStatus(DoneStatus),
    /// `{id}`.
    UserDeletedTask(Deleted),
    /// Full list view.
    UserCreatedShoppingList(ShoppingListView),
    /// Full list view.
    UserUpdatedShoppingList(ShoppingListView),
    /// `{id}`.
    UserDeletedShoppingList(Deleted),
    /// Full item view.
    UserCreatedShoppingListItem(ShoppingListItemView),
    /// `{id, purchased}`.
    UserUpdatedShoppingListItemPurchasedStatus(PurchasedStatus),
}

impl EventPayload {
    /// Discriminant of this payload.
    pub const fn event_type(&self) -> EventType {
        match self {
            Self::UserCreatedTask(_) => EventType::UserCreatedTask,
            Self::UserUpdatedTask(_) => EventType::UserUpdatedTask,
            Self::UserUpdatedTaskDoneStatus(_) => EventType::UserUpdatedTaskDoneStatus,
            Self::UserDeletedTask(_) => EventType::UserDeletedTask,
            Self::UserCreatedShoppingList(_) => EventType::UserCreatedShoppingList,
            Self::UserUpdatedShoppingList(_) => EventType::UserUpdatedShoppingList,
            Self::UserDeletedShoppingList(_) => EventType::UserDeletedShoppingList,
            Self::UserCreatedShoppingListItem(_) => EventType::UserCreatedShoppingListItem,
            Self::UserUpdatedShoppingListItemPurchasedStatus(_) => {
                EventType::UserUpdatedShoppingListItemPurchasedStatus
            }
        }
    }

    /// Family embedded in the payload itself, for views that carry one.
    fn embedded_family(&self) -> Option<FamilyId> {
        match self {
            Self::UserCreatedTask(task) | Self::UserUpdatedTask(task) => Some(task.family_id),
            Self::UserCreatedShoppingList(list) | Self::UserUpdatedShoppingList(list) => {
                Some(list.family_id)
            }
            _ => None,
        }
    }
}

/// Rejected envelope input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("envelope family {envelope_family} does not match payload family {payload_family}")]
pub struct EnvelopeMismatch {
    /// Family named by the envelope.
    pub envelope_family: FamilyId,
    /// Family named inside `data`.
    pub payload_family: FamilyId,
}

#[derive(Deserialize)]
struct RawEnvelope {
    family_id: FamilyId,
    #[serde(flatten)]
    payload: EventPayload,
}

impl TryFrom<RawEnvelope> for EventEnvelope {
    type Error = EnvelopeMismatch;

    fn try_from(raw: RawEnvelope) -> Result<Self, Self::Error> {
        match raw.payload.embedded_family() {
            Some(payload_family) if payload_family != raw.family_id => Err(EnvelopeMismatch {
                envelope_family: raw.family_id,
                payload_family,
            }),
            _ => Ok(Self {
                family_id: raw.family_id,
                payload: raw.payload,
            }),
        }
    }
}

/// A domain event addressed to one family.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawEnvelope")]
pub struct EventEnvelope {
    family_id: FamilyId,
    #[serde(flatten)]
    payload: EventPayload,
}

impl EventEnvelope {
    /// A task was created.
    pub fn task_created(task: TaskView) -> Self {
        Self {
            family_id: task.family_id,
            payload: EventPayload::UserCreatedTask(task),
        }
    }

    /// A task was edited.
    pub fn task_updated(task: TaskView) -> Self {
        Self {
            family_id: task.family_id,
            payload: EventPayload::UserUpdatedTask(task),
        }
    }

    /// A task's completion flag changed.
    pub fn task_done_status_changed(family_id: FamilyId, id: Uuid, done: bool) -> Self {
        Self {
            family_id,
            payload: EventPayload::UserUpdatedTaskDoneStatus(DoneStatus { id, done }),
        }
    }

    /// A task was deleted.
    pub fn task_deleted(family_id: FamilyId, id: Uuid) -> Self {
        Self {
            family_id,
            payload: EventPayload::UserDeletedTask(Deleted { id }),
        }
    }

    /// A shopping list was created.
    pub fn shopping_list_created(list: ShoppingListView) -> Self {
        Self {
            family_id: list.family_id,
            payload: EventPayload::UserCreatedShoppingList(list),
        }
    }

    /// A shopping list was renamed.
    pub fn shopping_list_updated(list: ShoppingListView) -> Self {
        Self {
            family_id: list.family_id,
            payload: EventPayload::UserUpdatedShoppingList(list),
        }
    }

    /// A shopping list was deleted.
    pub fn shopping_list_deleted(family_id: FamilyId, id: Uuid) -> Self {
        Self {
            family_id,
            payload: EventPayload::UserDeletedShoppingList(Deleted { id }),
        }
    }

    /// An item was added to a list owned by `family_id`.
    pub fn shopping_list_item_created(family_id: FamilyId, item: ShoppingListItemView) -> Self {
        Self {
            family_id,
            payload: EventPayload::UserCreatedShoppingListItem(item),
        }
    }

    /// An item's purchased flag changed.
    pub fn shopping_list_item_purchased_status_changed(
        family_id: FamilyId,
        id: Uuid,
        purchased: bool,
    ) -> Self {
        Self {
            family_id,
            payload: EventPayload::UserUpdatedShoppingListItemPurchasedStatus(PurchasedStatus {
                id,
                purchased,
            }),
        }
    }

    /// Target family.
    pub fn family_id(&self) -> FamilyId {
        self.family_id
    }

    /// Discriminant.
    pub fn event_type(&self) -> EventType {
        self.payload.event_type()
    }

    /// Typed payload.
    pub fn payload(&self) -> &EventPayload {
        &self.payload
    }

    /// Serialize to the wire JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
