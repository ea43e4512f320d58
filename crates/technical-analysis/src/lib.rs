pub mod classify;
pub mod indicators;
pub mod scorer;


pub use classify::*;
pub use indicators::*;
pub use scorer::*;
