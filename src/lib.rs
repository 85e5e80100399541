mod busbar;
mod compliance;
mod equi8;
mod error;
mod impedance;
mod loadcase;
mod network;
mod opt;
mod overrides;
mod pf;
mod regulator;
mod result;
mod sbus;
mod topology;
mod validate;

pub mod debug;
pub mod math;
pub mod radial;

#[cfg(test)]
mod tests;

pub use busbar::*;
pub use compliance::*;
pub use equi8::*;
pub use error::*;
pub use impedance::*;
pub use loadcase::*;
pub use network::*;
pub use opt::*;
pub use overrides::*;
pub use pf::*;
pub use regulator::*;
pub use result::*;
pub use sbus::*;
pub use topology::*;
pub use validate::*;
