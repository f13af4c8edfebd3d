// Domain-layer modules and shared errors/models
pub mod classifier {
    pub use crate::classifier::*;
}

pub mod filters {
    pub use crate::filters::*;
}

pub mod models {
    pub use crate::models::*;
}

pub mod query_builder {
    pub use crate::query_builder::*;
}

pub mod errors {
    pub use crate::errors::*;
}
