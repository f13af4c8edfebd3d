//! External service integrations.

pub mod optics_client {
    pub use crate::optics_client::*;
}

pub mod optics_extract {
    pub use crate::optics_extract::*;
}

pub mod optics_fanout {
    pub use crate::optics_fanout::*;
}
