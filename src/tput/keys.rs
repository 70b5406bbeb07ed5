/// Store keys used by one aggregation window.
///
/// The window id itself is the lock key; every record is the window id plus
/// a fixed suffix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowKeys {
    pub window: String,
    /// Prefix of the phase-1 summary records
    pub dict1: String,
    /// Prefix of the phase-2 summary records
    pub dict2: String,
    pub nodes_count: String,
    pub nodes_per_word: String,
    /// Candidate set with phase-3 tallies
    pub survivors: String,
    pub result: String,
    pub t1: String,
}

impl WindowKeys {
    pub fn new(window: &str) -> Self {
        let key = |suffix: &str| format!("{}{}", window, suffix);
        WindowKeys {
            window: window.to_string(),
            dict1: key("Dict1"),
            dict2: key("Dict2"),
            nodes_count: key("NodesCount"),
            nodes_per_word: key("NodesPerWord"),
            survivors: key("S"),
            result: key("Result"),
            t1: key("t1"),
        }
    }

    /// Prefix of the local counts `node` saved for this window.
    pub fn snapshot(&self, node: &str) -> String {
        format!("{}Local:{}", self.window, node)
    }

    /// Scalar and hash records removed once the window is finalized.
    pub fn intermediates(&self) -> [&str; 4] {
        [
            self.nodes_count.as_str(),
            self.nodes_per_word.as_str(),
            self.survivors.as_str(),
            self.t1.as_str(),
        ]
    }
}
