//! Per-client mosaic composition.
//!
//! Builds the pixel canvas one receiver sees: a single source letterboxed
//! to fill the view, or an N-up grid with aspect-preserving cells. Cell
//! assignment iterates sources in ascending client id so the layout is
//! stable across render passes.

use super::frame::{Canvas, VideoFrame};
use super::scale::{blit_scaled, fit_rect, FittedRect};

/// One sender's contribution to a composite pass.
#[derive(Debug, Clone)]
pub struct SourceFrame {
    pub client_id: u32,
    pub frame: VideoFrame,
}

/// Grid shape for `n` sources: two columns up to four sources, three after.
pub fn grid_dims(n: usize) -> (usize, usize) {
    let cols = if n <= 4 { 2 } else { 3 };
    let rows = n.div_ceil(cols);
    (cols, rows)
}

/// Compose the canvas for a receiver with `width_cells x height_cells`
/// characters. Half-block receivers get two pixel rows per cell. Returns
/// `None` when there is nothing to show.
pub fn compose(
    sources: &[SourceFrame],
    width_cells: u16,
    height_cells: u16,
    half_block: bool,
) -> Option<Canvas> {
    if sources.is_empty() || width_cells == 0 || height_cells == 0 {
        return None;
    }
    let cell_scale = if half_block { 2 } else { 1 };
    let canvas_w = width_cells as usize;
    let canvas_h = height_cells as usize * cell_scale;
    let mut canvas = Canvas::new(canvas_w, canvas_h);

    let mut ordered: Vec<&SourceFrame> = sources.iter().collect();
    ordered.sort_by_key(|s| s.client_id);

    if ordered.len() == 1 {
        let frame = &ordered[0].frame;
        let rect = fit_rect(frame.width, frame.height, canvas_w, canvas_h);
        blit_scaled(&mut canvas, frame, rect);
        return Some(canvas);
    }

    let (cols, rows) = grid_dims(ordered.len());
    let cell_w = canvas_w / cols;
    let cell_h = (height_cells as usize / rows) * cell_scale;
    if cell_w == 0 || cell_h == 0 {
        return Some(canvas);
    }

    for (idx, source) in ordered.iter().enumerate() {
        let col = idx % cols;
        let row = idx / cols;
        let fitted = fit_rect(source.frame.width, source.frame.height, cell_w, cell_h);
        let rect = FittedRect {
            x: col * cell_w + fitted.x,
            y: row * cell_h + fitted.y,
            width: fitted.width,
            height: fitted.height,
        };
        blit_scaled(&mut canvas, &source.frame, rect);
    }
    Some(canvas)
}
