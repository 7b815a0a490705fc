pub mod enums;
pub mod filters;
pub mod review_item;
pub mod training_batch;
pub mod training_case;

pub use enums::*;
pub use filters::*;
pub use review_item::*;
pub use training_batch::*;
pub use training_case::*;
