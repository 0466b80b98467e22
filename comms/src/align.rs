// Trait to generalize over primitive number types that are 8 bytes aligned.
//
// Receive buffers are made of these so that `f64` bodies can be cast in place.
pub trait Align8: bytemuck::Pod {}

impl Align8 for u64 {}
impl Align8 for i64 {}
impl Align8 for f64 {}
