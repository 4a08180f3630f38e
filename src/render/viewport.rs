use glam::UVec2;

/// Rectangle of a render target that maps to normalized device coordinates.
///
/// The origin is the bottom-left corner of the target, `y` growing upwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Viewport {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Viewport covering a whole target of the given size.
    pub const fn from_size(size: UVec2) -> Self {
        Self::new(0, 0, size.x, size.y)
    }

    pub fn size(&self) -> UVec2 {
        UVec2::new(self.width, self.height)
    }

    /// Intersects the viewport with a `bounds`-sized attachment.
    ///
    /// Returns `None` when nothing of the viewport lies inside it.
    pub fn clamped_to(&self, bounds: UVec2) -> Option<Viewport> {
        let x0 = (self.x as i64).clamp(0, bounds.x as i64);
        let y0 = (self.y as i64).clamp(0, bounds.y as i64);
        let x1 = (self.x as i64 + self.width as i64).clamp(0, bounds.x as i64);
        let y1 = (self.y as i64 + self.height as i64).clamp(0, bounds.y as i64);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(Viewport::new(
            x0 as i32,
            y0 as i32,
            (x1 - x0) as u32,
            (y1 - y0) as u32,
        ))
    }
}

impl From<[i32; 4]> for Viewport {
    fn from(v: [i32; 4]) -> Self {
        Self::new(v[0], v[1], v[2].max(0) as u32, v[3].max(0) as u32)
    }
}
