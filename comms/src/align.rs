/// Primitive number types whose alignment is at least 4 bytes.
///
/// Receive buffers made of these types can be reinterpreted as `f32` slices
/// once the frame header has been skipped.
pub trait Align4: bytemuck::Pod {}

impl Align4 for u32 {}
impl Align4 for i32 {}
impl Align4 for u64 {}
impl Align4 for i64 {}
impl Align4 for f32 {}
impl Align4 for f64 {}
