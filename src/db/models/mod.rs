pub mod content_index;
pub mod insight;
pub mod session;

pub use content_index::{ContentIndex, FileType};
pub use insight::{InsightType, ProductivityInsight};
pub use session::{Activity, AppSession};
