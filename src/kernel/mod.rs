// Kernel boundary - pluggable simulation kernels behind async traits.

pub mod recording;
pub mod traits;
