use geo::{Coord, CoordNum, Rect};

pub trait Intersection {
    type Output;
    /// `None` when the two shapes do not overlap.
    fn intersection(&self, rhs: &Self) -> Option<Self::Output>;
}

impl<T: CoordNum> Intersection for Rect<T> {
    type Output = Rect<T>;
    fn intersection(&self, rhs: &Self) -> Option<Rect<T>> {
        let lhs_max = self.max();
        let rhs_min = rhs.min();
        if (lhs_max.x < rhs_min.x) | (lhs_max.y < rhs_min.y) {
            return None;
        }

        let lhs_min = self.min();
        let rhs_max = rhs.max();
        if (lhs_min.x > rhs_max.x) | (lhs_min.y > rhs_max.y) {
            return None;
        }

        let min = operate(lhs_min, rhs_min, |x, y| if x > y { x } else { y });
        let max = operate(lhs_max, rhs_max, |x, y| if x < y { x } else { y });

        Some(Self::new(min, max))
    }
}

fn operate<T: CoordNum>(lhs: Coord<T>, rhs: Coord<T>, op: impl Fn(T, T) -> T) -> Coord<T> {
    Coord {
        x: op(lhs.x, rhs.x),
        y: op(lhs.y, rhs.y),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn overlapping_rects() {
        let lhs = Rect::new((0., 0.), (4., 4.));
        let rhs = Rect::new((2., -1.), (6., 3.));
        let overlap = lhs.intersection(&rhs).unwrap();
        assert_eq!(overlap, Rect::new((2., 0.), (4., 3.)));
    }

    #[rstest]
    fn disjoint_rects() {
        let lhs = Rect::new((0usize, 0), (2, 2));
        let rhs = Rect::new((3usize, 0), (5, 2));
        assert!(lhs.intersection(&rhs).is_none());
    }
}
