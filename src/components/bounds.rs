use std::ops::Range;

use geo::{Coord, Rect};
use ndarray::ArrayView2;

use crate::{components::transforms::GridTransform, errors::Result, intersection::Intersection};

/// Pixel window of a grid.
///
/// In underlaying impl `x` is the column and `y` the row,
/// `min` is inclusive and `max` exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelBounds(Rect<usize>);

impl PixelBounds {
    pub fn new(rows: Range<usize>, cols: Range<usize>) -> Self {
        Self(Rect::new(
            Coord {
                x: cols.start,
                y: rows.start,
            },
            Coord {
                x: cols.end,
                y: rows.end,
            },
        ))
    }

    /// Tight window around every `true` cell, `None` if there is none.
    pub fn from_selection(selection: ArrayView2<bool>) -> Option<Self> {
        let mut window: Option<(Range<usize>, Range<usize>)> = None;
        for ((row, col), _) in selection.indexed_iter().filter(|(_, selected)| **selected) {
            window = Some(match window {
                None => (row..row + 1, col..col + 1),
                Some((rows, cols)) => (
                    rows.start.min(row)..rows.end.max(row + 1),
                    cols.start.min(col)..cols.end.max(col + 1),
                ),
            });
        }
        window.map(|(rows, cols)| Self::new(rows, cols))
    }

    /// Window of a `(rows, cols)` grid holding every pixel whose center may fall
    /// inside `rect`, `None` if `rect` misses the grid.
    pub fn covering(rect: &Rect, transform: &GridTransform, shape: (usize, usize)) -> Result<Option<Self>> {
        let inverse = transform.inverse()?;
        let corners = [
            rect.min(),
            rect.max(),
            Coord {
                x: rect.min().x,
                y: rect.max().y,
            },
            Coord {
                x: rect.max().x,
                y: rect.min().y,
            },
        ]
        .map(|corner| inverse.apply(corner));
        let pixel_rect = Rect::new(corners[0], corners[1]);
        let pixel_rect = corners[2..]
            .iter()
            .fold(pixel_rect, |acc, corner| {
                Rect::new(
                    Coord {
                        x: acc.min().x.min(corner.x),
                        y: acc.min().y.min(corner.y),
                    },
                    Coord {
                        x: acc.max().x.max(corner.x),
                        y: acc.max().y.max(corner.y),
                    },
                )
            });
        let grid_rect = Rect::new((0., 0.), (shape.1 as f64, shape.0 as f64));
        let Some(overlap) = pixel_rect.intersection(&grid_rect) else {
            return Ok(None);
        };
        let rows = overlap.min().y.floor() as usize..(overlap.max().y.ceil() as usize).min(shape.0);
        let cols = overlap.min().x.floor() as usize..(overlap.max().x.ceil() as usize).min(shape.1);
        if rows.is_empty() || cols.is_empty() {
            return Ok(None);
        }
        Ok(Some(Self::new(rows, cols)))
    }

    pub fn rows(&self) -> Range<usize> {
        self.0.min().y..self.0.max().y
    }

    pub fn cols(&self) -> Range<usize> {
        self.0.min().x..self.0.max().x
    }

    /// (rows, cols)
    pub fn shape(&self) -> (usize, usize) {
        (self.0.height(), self.0.width())
    }

    /// (row, col) of the top left pixel of the window.
    pub fn offset(&self) -> (usize, usize) {
        (self.0.min().y, self.0.min().x)
    }
}
