//! Binary 2D morphology on slice masks.
//!
//! Everything here works on a row-major `Mask`. Operations allocate new masks;
//! slices are small enough (typically 512x512) that in-place tricks are not
//! worth the complexity.

/// Row-major boolean image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mask {
    width: usize,
    height: usize,
    data: Vec<bool>,
}

impl Mask {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![false; width * height],
        }
    }

    pub fn from_fn(width: usize, height: usize, f: impl Fn(usize, usize) -> bool) -> Self {
        let mut data = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                data.push(f(x, y));
            }
        }
        Self {
            width,
            height,
            data,
        }
    }

    pub fn from_vec(width: usize, height: usize, data: Vec<bool>) -> Self {
        debug_assert_eq!(data.len(), width * height);
        Self {
            width,
            height,
            data,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> bool {
        self.data[y * self.width + x]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, value: bool) {
        self.data[y * self.width + x] = value;
    }

    pub fn as_slice(&self) -> &[bool] {
        &self.data
    }

    pub fn count(&self) -> usize {
        self.data.iter().filter(|&&v| v).count()
    }

    pub fn is_empty(&self) -> bool {
        !self.data.iter().any(|&v| v)
    }

    fn invert(&self) -> Mask {
        Mask::from_vec(self.width, self.height, self.data.iter().map(|v| !v).collect())
    }

    /// Copy surrounded by `margin` unset pixels on every side.
    fn padded(&self, margin: usize) -> Mask {
        let width = self.width + 2 * margin;
        let mut out = Mask::new(width, self.height + 2 * margin);
        for y in 0..self.height {
            let row = &self.data[y * self.width..(y + 1) * self.width];
            let start = (y + margin) * width + margin;
            out.data[start..start + self.width].copy_from_slice(row);
        }
        out
    }

    /// The `width`x`height` window starting at `(margin, margin)`.
    fn cropped(&self, margin: usize, width: usize, height: usize) -> Mask {
        let mut data = Vec::with_capacity(width * height);
        for y in 0..height {
            let start = (y + margin) * self.width + margin;
            data.extend_from_slice(&self.data[start..start + width]);
        }
        Mask::from_vec(width, height, data)
    }

    fn index(&self, x: usize, y: usize) -> usize {
        y * self.width + x
    }
}

// =============================================================================
// Dilation / erosion / closing
// =============================================================================

/// Square dilation with a `(2r+1)x(2r+1)` structuring element.
///
/// Pixels outside the image count as unset.
pub fn dilate(mask: &Mask, radius: usize) -> Mask {
    if radius == 0 {
        return mask.clone();
    }

    let (w, h) = (mask.width, mask.height);

    // Separable: horizontal pass then vertical pass, each via prefix counts.
    let mut horizontal = vec![false; w * h];
    let mut prefix = vec![0usize; w.max(h) + 1];
    for y in 0..h {
        for x in 0..w {
            prefix[x + 1] = prefix[x] + mask.data[y * w + x] as usize;
        }
        for x in 0..w {
            let lo = x.saturating_sub(radius);
            let hi = (x + radius + 1).min(w);
            horizontal[y * w + x] = prefix[hi] > prefix[lo];
        }
    }

    let mut out = vec![false; w * h];
    for x in 0..w {
        for y in 0..h {
            prefix[y + 1] = prefix[y] + horizontal[y * w + x] as usize;
        }
        for y in 0..h {
            let lo = y.saturating_sub(radius);
            let hi = (y + radius + 1).min(h);
            out[y * w + x] = prefix[hi] > prefix[lo];
        }
    }

    Mask::from_vec(w, h, out)
}

/// Square erosion with a `(2r+1)x(2r+1)` structuring element.
///
/// Pixels outside the image count as set, so erosion never eats inwards from
/// the image border.
pub fn erode(mask: &Mask, radius: usize) -> Mask {
    dilate(&mask.invert(), radius).invert()
}

/// Morphological closing: dilation followed by erosion.
///
/// The mask is padded by `radius` unset pixels first, so a region within
/// `radius` of the image edge is not glued to it.
pub fn close(mask: &Mask, radius: usize) -> Mask {
    if radius == 0 {
        return mask.clone();
    }
    let padded = mask.padded(radius);
    erode(&dilate(&padded, radius), radius).cropped(radius, mask.width, mask.height)
}

// =============================================================================
// Connected components
// =============================================================================

const NEIGHBORS_8: [(isize, isize); 8] = [
    (-1, -1),
    (0, -1),
    (1, -1),
    (-1, 0),
    (1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
];

const NEIGHBORS_4: [(isize, isize); 4] = [(0, -1), (-1, 0), (1, 0), (0, 1)];

/// One 8-connected component.
#[derive(Debug, Clone)]
pub struct Component {
    /// Pixel indices (row-major) belonging to the component
    pub pixels: Vec<usize>,

    /// Whether any pixel lies on the image border
    pub touches_border: bool,
}

/// Label the 8-connected components of `mask`.
pub fn components(mask: &Mask) -> Vec<Component> {
    let (w, h) = (mask.width, mask.height);
    let mut visited = vec![false; w * h];
    let mut found = Vec::new();
    let mut stack = Vec::new();

    for start in 0..w * h {
        if !mask.data[start] || visited[start] {
            continue;
        }

        let mut pixels = Vec::new();
        let mut touches_border = false;
        visited[start] = true;
        stack.push(start);

        while let Some(idx) = stack.pop() {
            pixels.push(idx);
            let (x, y) = (idx % w, idx / w);
            if x == 0 || y == 0 || x + 1 == w || y + 1 == h {
                touches_border = true;
            }

            for (dx, dy) in NEIGHBORS_8 {
                let (Some(nx), Some(ny)) = (x.checked_add_signed(dx), y.checked_add_signed(dy))
                else {
                    continue;
                };
                if nx >= w || ny >= h {
                    continue;
                }
                let n = mask.index(nx, ny);
                if mask.data[n] && !visited[n] {
                    visited[n] = true;
                    stack.push(n);
                }
            }
        }

        found.push(Component {
            pixels,
            touches_border,
        });
    }

    found
}

/// Keep only the largest component, optionally ignoring components that touch
/// the image border. Returns an empty mask when nothing qualifies.
pub fn largest_component(mask: &Mask, exclude_border: bool) -> Mask {
    let mut out = Mask::new(mask.width, mask.height);

    let best = components(mask)
        .into_iter()
        .filter(|c| !(exclude_border && c.touches_border))
        .max_by_key(|c| c.pixels.len());

    if let Some(component) = best {
        for idx in component.pixels {
            out.data[idx] = true;
        }
    }
    out
}

/// Fill enclosed holes: unset pixels not 4-connected to the image border.
pub fn fill_holes(mask: &Mask) -> Mask {
    let (w, h) = (mask.width, mask.height);
    let mut outside = vec![false; w * h];
    let mut stack = Vec::new();

    for y in 0..h {
        for x in 0..w {
            let on_border = x == 0 || y == 0 || x + 1 == w || y + 1 == h;
            let idx = y * w + x;
            if on_border && !mask.data[idx] && !outside[idx] {
                outside[idx] = true;
                stack.push(idx);
            }
        }
    }

    while let Some(idx) = stack.pop() {
        let (x, y) = (idx % w, idx / w);
        for (dx, dy) in NEIGHBORS_4 {
            let (Some(nx), Some(ny)) = (x.checked_add_signed(dx), y.checked_add_signed(dy)) else {
                continue;
            };
            if nx >= w || ny >= h {
                continue;
            }
            let n = ny * w + nx;
            if !mask.data[n] && !outside[n] {
                outside[n] = true;
                stack.push(n);
            }
        }
    }

    Mask::from_vec(w, h, outside.into_iter().map(|o| !o).collect())
}

// =============================================================================
// Distance transform
// =============================================================================

/// Approximate Euclidean distance (mm) from each set pixel to the nearest
/// unset pixel, using a two-pass 3x3 chamfer with physical weights.
///
/// Pixels beyond the image border count as unset. Unset pixels get 0.
pub fn distance_to_outside(mask: &Mask, spacing_x: f64, spacing_y: f64) -> Vec<f32> {
    let (w, h) = (mask.width, mask.height);
    let dx = spacing_x as f32;
    let dy = spacing_y as f32;
    let diag = (spacing_x.hypot(spacing_y)) as f32;

    let mut dist: Vec<f32> = mask
        .data
        .iter()
        .map(|&set| if set { f32::INFINITY } else { 0.0 })
        .collect();

    // Reads a neighbour; anything off-image is "outside" at distance 0.
    let at = |dist: &[f32], x: isize, y: isize| -> f32 {
        if x < 0 || y < 0 || x >= w as isize || y >= h as isize {
            0.0
        } else {
            dist[y as usize * w + x as usize]
        }
    };

    for y in 0..h as isize {
        for x in 0..w as isize {
            let idx = y as usize * w + x as usize;
            if dist[idx] == 0.0 {
                continue;
            }
            let best = dist[idx]
                .min(at(&dist, x - 1, y) + dx)
                .min(at(&dist, x, y - 1) + dy)
                .min(at(&dist, x - 1, y - 1) + diag)
                .min(at(&dist, x + 1, y - 1) + diag);
            dist[idx] = best;
        }
    }

    for y in (0..h as isize).rev() {
        for x in (0..w as isize).rev() {
            let idx = y as usize * w + x as usize;
            if dist[idx] == 0.0 {
                continue;
            }
            let best = dist[idx]
                .min(at(&dist, x + 1, y) + dx)
                .min(at(&dist, x, y + 1) + dy)
                .min(at(&dist, x + 1, y + 1) + diag)
                .min(at(&dist, x - 1, y + 1) + diag);
            dist[idx] = best;
        }
    }

    dist
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn rect(w: usize, h: usize, x0: usize, y0: usize, x1: usize, y1: usize) -> Mask {
        Mask::from_fn(w, h, |x, y| x >= x0 && x < x1 && y >= y0 && y < y1)
    }

    #[test]
    fn test_dilate_single_pixel() {
        let mask = rect(7, 7, 3, 3, 4, 4);
        let dilated = dilate(&mask, 1);
        assert_eq!(dilated.count(), 9);
        assert!(dilated.get(2, 2) && dilated.get(4, 4));
        assert!(!dilated.get(1, 3));
    }

    #[test]
    fn test_erode_rect() {
        let mask = rect(10, 10, 2, 2, 8, 8);
        let eroded = erode(&mask, 1);
        assert_eq!(eroded, rect(10, 10, 3, 3, 7, 7));
    }

    #[test]
    fn test_erode_does_not_eat_from_border() {
        let mask = Mask::from_fn(5, 5, |_, _| true);
        assert_eq!(erode(&mask, 2).count(), 25);
    }

    #[test]
    fn test_close_fills_small_gap() {
        let mut mask = rect(12, 12, 2, 2, 10, 10);
        mask.set(5, 5, false);
        mask.set(6, 5, false);
        let closed = close(&mask, 1);
        assert!(closed.get(5, 5) && closed.get(6, 5));
        assert_eq!(closed, rect(12, 12, 2, 2, 10, 10));
    }

    #[test]
    fn test_close_near_edge_stays_off_border() {
        // One pixel of background between the region and the image edge.
        let mask = rect(12, 12, 1, 1, 11, 11);
        let closed = close(&mask, 3);

        assert_eq!(closed, mask);
        assert!((0..12).all(|i| !closed.get(i, 0) && !closed.get(0, i)));
        assert_eq!(largest_component(&closed, true).count(), 100);
    }

    #[test]
    fn test_components_and_border() {
        let mut mask = rect(10, 10, 3, 3, 6, 6);
        mask.set(0, 0, true);
        mask.set(0, 1, true);
        let comps = components(&mask);
        assert_eq!(comps.len(), 2);
        assert_eq!(comps.iter().filter(|c| c.touches_border).count(), 1);
    }

    #[test]
    fn test_largest_component_excludes_border() {
        // Big component touching the border, small one inside.
        let mut mask = rect(20, 20, 0, 0, 20, 5);
        for (x, y) in [(10, 10), (11, 10), (10, 11)] {
            mask.set(x, y, true);
        }

        let kept = largest_component(&mask, true);
        assert_eq!(kept.count(), 3);

        let kept_any = largest_component(&mask, false);
        assert_eq!(kept_any.count(), 100);
    }

    #[test]
    fn test_largest_component_empty() {
        let mask = Mask::new(4, 4);
        assert!(largest_component(&mask, true).is_empty());
    }

    #[test]
    fn test_fill_holes() {
        let mut mask = rect(10, 10, 2, 2, 8, 8);
        mask.set(4, 4, false);
        mask.set(5, 5, false);
        let filled = fill_holes(&mask);
        assert_eq!(filled, rect(10, 10, 2, 2, 8, 8));
    }

    #[test]
    fn test_fill_holes_keeps_open_notch() {
        // A notch reaching the border is not a hole.
        let mut mask = rect(10, 10, 2, 2, 8, 8);
        for y in 0..5 {
            mask.set(5, y, false);
        }
        assert_eq!(fill_holes(&mask), mask);
    }

    #[test]
    fn test_distance_to_outside() {
        let mask = rect(11, 11, 1, 1, 10, 10);
        let dist = distance_to_outside(&mask, 2.0, 2.0);

        assert_eq!(dist[0], 0.0);
        assert_eq!(dist[11 + 1], 2.0);
        // Centre pixel (5,5) is 5 pixels from the unset ring at x=0.
        assert!((dist[5 * 11 + 5] - 10.0).abs() < 1e-4);
    }

    #[test]
    fn test_distance_counts_image_border_as_outside() {
        let mask = Mask::from_fn(5, 1, |_, _| true);
        let dist = distance_to_outside(&mask, 1.0, 1.0);
        assert_eq!(dist, vec![1.0, 1.0, 1.0, 1.0, 1.0]);
    }
}
