mod announced;
mod broadcast;
mod frame;
mod group;
mod track;

pub use announced::*;
pub use broadcast::*;
pub use frame::*;
pub use group::*;
pub use track::*;
