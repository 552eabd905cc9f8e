use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// LayoutMode
// ---------------------------------------------------------------------------

/// How the call view arranges video tiles.
///
/// * `Grid`       -- every video track tiled in rows x cols.
/// * `Speaker`    -- one pinned or screen-sharing participant emphasised.
/// * `Fullscreen` -- a single track fills the view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayoutMode {
    #[default]
    Grid,
    Speaker,
    Fullscreen,
}

impl LayoutMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Grid => "grid",
            Self::Speaker => "speaker",
            Self::Fullscreen => "fullscreen",
        }
    }
}

impl std::fmt::Display for LayoutMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// GridSize
// ---------------------------------------------------------------------------

/// Tile arrangement for the grid layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridSize {
    pub rows: usize,
    pub cols: usize,
}

impl GridSize {
    /// Smallest square-ish grid holding `tracks` tiles.
    ///
    /// `cols = ceil(sqrt(n))`, `rows = ceil(n / cols)`, and an empty call
    /// still gets a single 1x1 cell.
    pub fn for_tracks(tracks: usize) -> Self {
        if tracks == 0 {
            return Self::default();
        }
        let cols = ceil_sqrt(tracks);
        let rows = tracks.div_ceil(cols);
        Self { rows, cols }
    }

    /// Number of cells the grid provides.
    pub fn capacity(&self) -> usize {
        self.rows * self.cols
    }
}

impl Default for GridSize {
    fn default() -> Self {
        Self { rows: 1, cols: 1 }
    }
}

// Integer ceil(sqrt(n)); avoids float rounding on perfect squares.
fn ceil_sqrt(n: usize) -> usize {
    let covers = |root: usize| root.checked_mul(root).map_or(true, |sq| sq >= n);
    let mut root = (n as f64).sqrt() as usize;
    while !covers(root) {
        root += 1;
    }
    while root > 1 && covers(root - 1) {
        root -= 1;
    }
    root.max(1)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
