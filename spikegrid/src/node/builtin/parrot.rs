use crate::node::{Node, NodeError, UpdateContext};

/// Node re-emitting the spikes it receives.
///
/// All spikes received for a step are relayed as one event whose multiplicity
/// is the total input multiplicity, saturated to `u32::MAX`. Weights and
/// receptors of the input are ignored.
#[derive(Clone, Debug, Default)]
pub struct Parrot {}

impl Parrot {
    /// Creates a parrot node.
    pub fn new() -> Self {
        Self {}
    }
}

impl Node for Parrot {
    fn model(&self) -> &'static str {
        "parrot"
    }

    fn update(&mut self, cx: &mut UpdateContext<'_>) -> Result<(), NodeError> {
        let multiplicity = cx.input().multiplicity();

        cx.emit(u32::try_from(multiplicity).unwrap_or(u32::MAX))
    }
}
