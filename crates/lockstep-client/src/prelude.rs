pub use crate::{Client, Transport};
