//! Helpers for moving pixel rows between GPU buffers and images.

/// Row pitch of a texture-to-buffer copy of `width` texels of
/// `bytes_per_texel` bytes, rounded up to `alignment`.
pub fn padded_bytes_per_row(width: u32, bytes_per_texel: u32, alignment: u32) -> u32 {
    let unpadded = width * bytes_per_texel;
    unpadded.div_ceil(alignment) * alignment
}

/// Packs padded RGBA8 rows into tightly packed RGB8 rows, dropping alpha.
///
/// `padded` must hold `height` rows of `bytes_per_row` bytes each, of which
/// the first `width * 4` are texels.
pub fn rgba_rows_to_rgb(padded: &[u8], width: u32, height: u32, bytes_per_row: u32) -> Vec<u8> {
    let width = width as usize;
    let mut rgb = Vec::with_capacity(width * height as usize * 3);
    for row in padded
        .chunks(bytes_per_row as usize)
        .take(height as usize)
    {
        for texel in row[..width * 4].chunks_exact(4) {
            rgb.extend_from_slice(&texel[..3]);
        }
    }
    rgb
}

/// Reverses the order of `row_len`-byte rows in place.
pub fn flip_rows(data: &mut [u8], row_len: usize) {
    if row_len == 0 {
        return;
    }
    let rows = data.len() / row_len;
    for i in 0..rows / 2 {
        let (top, bottom) = data.split_at_mut((rows - 1 - i) * row_len);
        top[i * row_len..(i + 1) * row_len].swap_with_slice(&mut bottom[..row_len]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padded_rows_are_aligned() {
        assert_eq!(padded_bytes_per_row(100, 4, 256), 512);
        assert_eq!(padded_bytes_per_row(64, 4, 256), 256);
        assert_eq!(padded_bytes_per_row(1920, 4, 256), 7680);
        assert_eq!(padded_bytes_per_row(1, 4, 256), 256);
    }

    #[test]
    fn rgba_padding_and_alpha_are_stripped() {
        // 2x2 texels, rows padded to 12 bytes.
        let padded = [
            1, 2, 3, 255, 4, 5, 6, 255, 0, 0, 0, 0, //
            7, 8, 9, 255, 10, 11, 12, 255, 0, 0, 0, 0,
        ];
        assert_eq!(
            rgba_rows_to_rgb(&padded, 2, 2, 12),
            vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]
        );
    }

    #[test]
    fn flip_rows_odd_count() {
        let mut data = vec![1, 1, 2, 2, 3, 3];
        flip_rows(&mut data, 2);
        assert_eq!(data, vec![3, 3, 2, 2, 1, 1]);
    }

    #[test]
    fn flip_rows_even_count() {
        let mut data = vec![1, 2, 3, 4];
        flip_rows(&mut data, 1);
        assert_eq!(data, vec![4, 3, 2, 1]);
    }
}
