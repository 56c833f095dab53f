// ABOUTME: Fit helper computing terminal rows/columns from the size of the host container

use serde::{Deserialize, Serialize};

pub const MINIMUM_COLS: u16 = 2;
pub const MINIMUM_ROWS: u16 = 1;

/// Measured size of the element the terminal lives in
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContainerSize {
    pub cols: u16,
    pub rows: u16,
    /// Pixel sizes, when the host reports them (often 0 over ssh)
    pub width_px: u16,
    pub height_px: u16,
}

impl ContainerSize {
    pub fn cells(cols: u16, rows: u16) -> Self {
        Self {
            cols,
            rows,
            ..Default::default()
        }
    }

    fn has_pixels(&self) -> bool {
        self.width_px > 0 && self.height_px > 0
    }
}

/// Glyph cell size in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellMetrics {
    pub width_px: u16,
    pub height_px: u16,
}

/// Work out how many columns and rows fit in `size`.
///
/// Pixel geometry wins when both the container and the metrics provide it,
/// otherwise the container's own cell counts are used. Returns `None` for a
/// container with no area, i.e. a zero cell dimension and no pixel size.
pub fn propose_dimensions(
    size: ContainerSize,
    metrics: Option<CellMetrics>,
    padding_px: u16,
) -> Option<(u16, u16)> {
    let (cols, rows) = match metrics {
        Some(cell) if size.has_pixels() && cell.width_px > 0 && cell.height_px > 0 => {
            let width = size.width_px.saturating_sub(padding_px.saturating_mul(2));
            let height = size.height_px.saturating_sub(padding_px.saturating_mul(2));
            (width / cell.width_px, height / cell.height_px)
        }
        _ => (size.cols, size.rows),
    };

    if (size.cols == 0 || size.rows == 0) && !size.has_pixels() {
        return None;
    }

    Some((cols.max(MINIMUM_COLS), rows.max(MINIMUM_ROWS)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_counts_used_without_metrics() {
        assert_eq!(
            propose_dimensions(ContainerSize::cells(120, 40), None, 0),
            Some((120, 40))
        );
    }

    #[test]
    fn test_pixel_geometry_with_metrics() {
        let size = ContainerSize {
            cols: 80,
            rows: 24,
            width_px: 1000,
            height_px: 500,
        };
        let cell = CellMetrics { width_px: 9, height_px: 18 };
        // 1000 / 9 = 111, 500 / 18 = 27
        assert_eq!(propose_dimensions(size, Some(cell), 0), Some((111, 27)));
        // padding comes off both sides
        assert_eq!(propose_dimensions(size, Some(cell), 5), Some((110, 27)));
    }

    #[test]
    fn test_metrics_ignored_without_pixel_size() {
        let cell = CellMetrics { width_px: 9, height_px: 18 };
        assert_eq!(
            propose_dimensions(ContainerSize::cells(80, 24), Some(cell), 0),
            Some((80, 24))
        );
    }

    #[test]
    fn test_results_are_clamped_to_minimum() {
        assert_eq!(
            propose_dimensions(ContainerSize::cells(1, 1), None, 0),
            Some((MINIMUM_COLS, MINIMUM_ROWS))
        );
        let tiny = ContainerSize {
            cols: 0,
            rows: 0,
            width_px: 4,
            height_px: 4,
        };
        assert_eq!(
            propose_dimensions(tiny, Some(CellMetrics { width_px: 9, height_px: 18 }), 0),
            Some((MINIMUM_COLS, MINIMUM_ROWS))
        );
    }

    #[test]
    fn test_empty_container_has_no_dimensions() {
        assert_eq!(propose_dimensions(ContainerSize::default(), None, 0), None);
        // One zero side is still no area
        assert_eq!(propose_dimensions(ContainerSize::cells(1, 0), None, 0), None);
        assert_eq!(propose_dimensions(ContainerSize::cells(0, 40), None, 0), None);
    }
}
