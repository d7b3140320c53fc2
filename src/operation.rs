#[derive(Debug, Clone)]
pub enum OperationEvent {
    DiscoverStart,
    PortDetected {
        index: usize,
        name: String,
    },
    DiscoverDone {
        count: usize,
    },
    PortSelected {
        name: String,
    },

    HexLoaded {
        bytes: usize,
        blocks: usize,
    },

    Connected,
    CrystalSet {
        khz: u32,
    },
    EchoDisabled,

    EraseStart,
    EraseDone,

    /// One block handed to the target, in programming order (which runs
    /// from the highest flash offset down).
    ProgramBlock {
        index: usize,
        total: usize,
        offset: usize,
    },
    /// One block compared against flash, in ascending order.
    VerifyBlock {
        index: usize,
        total: usize,
        offset: usize,
    },

    Done,
}
