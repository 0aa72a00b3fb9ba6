/// Crawl lifecycle states
///
/// The controller owns exactly one `CrawlState`. Every change goes through
/// [`CrawlState::can_transition_to`], which encodes the legal transitions.
use std::fmt;

/// Represents the current state of a crawl
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CrawlState {
    /// Controller constructed, nothing set up yet
    Nascent,

    /// Initialization in progress (disk, logs, frontier, pipeline, pool)
    Preparing,

    /// Start requested; processors' initial tasks have run
    Started,

    /// Workers are fetching and processing items
    Running,

    /// Pause requested, waiting for active workers to drop their items
    Pausing,

    /// No worker holds an item; the frontier hands out nothing
    Paused,

    /// A checkpoint is being written (only entered from `Paused`)
    Checkpointing,

    /// Stop requested, waiting for every worker to exit
    Stopping,

    /// Terminal: all subsystems released
    Finished,
}

impl CrawlState {
    /// Returns true if moving from `self` to `next` is a legal transition
    ///
    /// `Pausing -> Running` is accepted so an operator can cancel a pause
    /// that has not completed yet. `Checkpointing -> Stopping` is not
    /// legal; a stop requested during a checkpoint is deferred until the
    /// checkpoint has returned the crawl to `Paused`.
    pub fn can_transition_to(&self, next: CrawlState) -> bool {
        use CrawlState::*;
        matches!(
            (self, next),
            (Nascent, Preparing)
                | (Preparing, Started)
                | (Preparing, Stopping)
                | (Started, Running)
                | (Running, Pausing)
                | (Pausing, Paused)
                | (Pausing, Running)
                | (Paused, Running)
                | (Paused, Checkpointing)
                | (Checkpointing, Paused)
                | (Running, Stopping)
                | (Pausing, Stopping)
                | (Paused, Stopping)
                | (Stopping, Finished)
        )
    }

    /// Returns true once the crawl has been asked to stop (or has stopped)
    pub fn is_ending(&self) -> bool {
        matches!(self, Self::Stopping | Self::Finished)
    }

    /// Returns true for the states in which workers must not take new items
    pub fn holds_workers(&self) -> bool {
        matches!(self, Self::Pausing | Self::Paused | Self::Checkpointing)
    }

    /// Upper-case name, as shown in reports and crawl logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Nascent => "NASCENT",
            Self::Preparing => "PREPARING",
            Self::Started => "STARTED",
            Self::Running => "RUNNING",
            Self::Pausing => "PAUSING",
            Self::Paused => "PAUSED",
            Self::Checkpointing => "CHECKPOINTING",
            Self::Stopping => "STOPPING",
            Self::Finished => "FINISHED",
        }
    }

    pub(crate) fn to_u8(self) -> u8 {
        self as u8
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Nascent,
            1 => Self::Preparing,
            2 => Self::Started,
            3 => Self::Running,
            4 => Self::Pausing,
            5 => Self::Paused,
            6 => Self::Checkpointing,
            7 => Self::Stopping,
            _ => Self::Finished,
        }
    }

    /// Returns all crawl states in lifecycle order
    pub fn all_states() -> Vec<Self> {
        vec![
            Self::Nascent,
            Self::Preparing,
            Self::Started,
            Self::Running,
            Self::Pausing,
            Self::Paused,
            Self::Checkpointing,
            Self::Stopping,
            Self::Finished,
        ]
    }
}

impl fmt::Display for CrawlState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
