pub mod mask;
pub mod phone;
pub mod pick;

pub use mask::{DEFAULT_KEEP, mask};
pub use phone::normalize_phone;
pub use pick::pick_random_excluding;
