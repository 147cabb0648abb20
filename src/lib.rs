pub mod log {
    pub use ard_log::*;
}

pub mod cmd {
    pub use ard_cmd::*;
}

pub mod prelude {
    pub use ard_cmd::prelude::*;
}
