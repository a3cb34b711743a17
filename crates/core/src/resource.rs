/// Hard ceilings applied while decoding untrusted streams and lifting the
/// resulting graphs. Exceeding one is a terminal error, never a truncation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "arbitrary", derive(arbitrary::Arbitrary))]
pub struct DecodeLimits {
    pub max_stack_depth: usize,
    pub max_marks: usize,
    pub max_memo_entries: usize,
    pub max_objects: usize,
    pub max_container_len: usize,
    pub max_operand_len: usize,
    pub max_nesting: usize,
    /// Deepest chain of nested objects the encoder and the JSON mapping walk.
    /// Both recurse, so this guards the call stack.
    pub max_object_depth: usize,
}

impl Default for DecodeLimits {
    fn default() -> Self {
        Self {
            max_stack_depth: 1 << 16,
            max_marks: 1 << 12,
            max_memo_entries: 1 << 22,
            max_objects: 1 << 22,
            max_container_len: 1 << 22,
            max_operand_len: 256 * 1024 * 1024,
            max_nesting: 256,
            max_object_depth: 1_000,
        }
    }
}

impl DecodeLimits {
    /// Tight limits for small inputs in tests and fuzzing.
    pub fn strict() -> Self {
        Self {
            max_stack_depth: 1_024,
            max_marks: 256,
            max_memo_entries: 65_536,
            max_objects: 65_536,
            max_container_len: 65_536,
            max_operand_len: 1024 * 1024,
            max_nesting: 64,
            max_object_depth: 128,
        }
    }
}
