mod entity;
mod note;
mod photo;
mod project;
mod punchlist_item;
mod user;

pub use entity::{updated_at_of, Entity, EntityKey, EntityType};
pub use note::Note;
pub use photo::{NewPhoto, Photo, PhotoPatch};
pub use project::{Project, ProjectStatus};
pub use punchlist_item::{
    ItemStatus, NewPunchlistItem, Priority, PunchlistItem, PunchlistItemPatch, Trade,
};
pub use user::{User, UserRole};
