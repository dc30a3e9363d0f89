mod actions;
mod morton;
mod sh_rotate;
mod transform;

pub use actions::{ActionError, Comparator, ProcessAction, VisibilityTarget, apply_actions};
pub use morton::{morton_order, morton_sort, morton3, part1_by2};
pub use sh_rotate::ShRotation;
pub use transform::{Transform, apply_transform};
