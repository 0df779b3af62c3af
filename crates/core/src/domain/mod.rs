pub mod conversation;
pub mod inventory;
pub mod lead;
pub mod tenant;
