//! Single-selection panel router.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tab {
    #[default]
    Finance,
    Projects,
    Agenda,
    System,
}

impl Tab {
    pub const ALL: [Tab; 4] = [Tab::Finance, Tab::Projects, Tab::Agenda, Tab::System];

    pub fn id(self) -> &'static str {
        match self {
            Tab::Finance => "finance",
            Tab::Projects => "projects",
            Tab::Agenda => "agenda",
            Tab::System => "system",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Tab::Finance => "Balanço",
            Tab::Projects => "Projetos",
            Tab::Agenda => "Agenda",
            Tab::System => "Núcleo",
        }
    }
}

impl fmt::Display for Tab {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown tab: {0}")]
pub struct UnknownTab(pub String);

impl FromStr for Tab {
    type Err = UnknownTab;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Tab::ALL
            .into_iter()
            .find(|tab| tab.id().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownTab(s.to_string()))
    }
}

/// Which panel is visible. No history, no per-tab memory.
#[derive(Debug, Default)]
pub struct TabRouter {
    selected: Tab,
    epoch: u64,
}

impl TabRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn selected(&self) -> Tab {
        self.selected
    }

    /// Bumped on every selection; transient panel state keyed to an older
    /// epoch is stale.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Show `tab`. Always succeeds, even when it is already selected.
    pub fn select(&mut self, tab: Tab) -> Tab {
        let previous = self.selected;
        self.selected = tab;
        self.epoch += 1;
        previous
    }
}
