use derivative::Derivative;

#[derive(Clone, Copy, Debug, Derivative)]
#[derivative(Default)]
pub struct ChainConfig {
    /// Maximum number of slots a block may be ahead of the state it is applied to.
    #[derivative(Default(value = "32"))]
    pub max_empty_slots: u64,
    #[derivative(Default(value = "true"))]
    pub verify_blocks: bool,
}

impl ChainConfig {
    #[must_use]
    pub fn minimal() -> Self {
        Self {
            max_empty_slots: 8,
            ..Self::default()
        }
    }
}
