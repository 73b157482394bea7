use std::fmt::Debug;

use num_traits::Float as NumFloat;

/// Element types of numeric sweeps and generated programs (`f32`, `f64`).
///
/// The node hooks only ask for `Clone + Zero`; this trait is what the sweep
/// driver and code generation need on top of that.
pub trait Float: NumFloat + Send + Sync + Debug + 'static {
    /// Name of the matching C element type in rendered programs.
    const C_TYPE: &'static str;
}

impl Float for f32 {
    const C_TYPE: &'static str = "float";
}

impl Float for f64 {
    const C_TYPE: &'static str = "double";
}
