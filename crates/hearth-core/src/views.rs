//! Read models carried as event payloads.
//!
//! These mirror the JSON the REST API returns for the same resources, so a
//! client can apply a pushed event with the same decoder it uses for HTTP
//! responses.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ids::{FamilyId, UserId};

/// A family member as shown on a task or list (assignee or creator).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberView {
    /// User id.
    pub id: UserId,
    /// Given name.
    pub first_name: String,
    /// Family name.
    pub last_name: String,
}

/// Full view of a family task.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskView {
    /// Task id.
    pub id: Uuid,
    /// Owning family.
    pub family_id: FamilyId,
    /// Member the task is assigned to.
    pub assignee: MemberView,
    /// Member who created the task.
    pub creator: MemberView,
    /// Task title.
    pub title: String,
    /// Completion flag.
    pub done: bool,
}

/// Full view of a shopping list.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShoppingListView {
    /// List id.
    pub id: Uuid,
    /// Member who created the list.
    pub creator: MemberView,
    /// Owning family.
    pub family_id: FamilyId,
    /// List name.
    pub name: String,
}

/// Full view of a shopping list item.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShoppingListItemView {
    /// Item id.
    pub id: Uuid,
    /// Member who added the item.
    pub creator: MemberView,
    /// List the item belongs to.
    pub shopping_list_id: Uuid,
    /// Purchased flag.
    pub purchased: bool,
    /// Item name.
    pub name: String,
}

/// `{id, done}` payload for task completion changes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoneStatus {
    /// Task id.
    pub id: Uuid,
    /// New completion flag.
    pub done: bool,
}

/// `{id, purchased}` payload for item purchase changes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchasedStatus {
    /// Item id.
    pub id: Uuid,
    /// New purchased flag.
    pub purchased: bool,
}

/// `{id}` payload for deletions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deleted {
    /// Id of the removed resource.
    pub id: Uuid,
}
