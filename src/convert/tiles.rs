//! TILED_FULL frame layout: square frames in row-major order, edges padded.

/// Number of frame columns and rows needed to cover `width` x `height`.
pub fn grid(width: u32, height: u32, tile: u32) -> (u32, u32) {
    (width.div_ceil(tile), height.div_ceil(tile))
}

/// Copy one `tile` x `tile` frame out of an interleaved image.
///
/// Pixels outside the image are set to `fill`.
#[allow(clippy::too_many_arguments)]
pub fn extract<T: Copy>(
    data: &[T],
    width: u32,
    height: u32,
    samples: usize,
    tile: u32,
    column: u32,
    row: u32,
    fill: T,
) -> Vec<T> {
    let tile = tile as usize;
    let (width, height) = (width as usize, height as usize);
    let x0 = column as usize * tile;
    let y0 = row as usize * tile;

    let mut frame = vec![fill; tile * tile * samples];
    if x0 >= width || y0 >= height {
        return frame;
    }

    let copy_width = tile.min(width - x0);
    let copy_height = tile.min(height - y0);
    for dy in 0..copy_height {
        let src = ((y0 + dy) * width + x0) * samples;
        let dst = dy * tile * samples;
        frame[dst..dst + copy_width * samples]
            .copy_from_slice(&data[src..src + copy_width * samples]);
    }
    frame
}

/// All frames of an image, in TILED_FULL order.
pub fn frames<'a, T: Copy>(
    data: &'a [T],
    width: u32,
    height: u32,
    samples: usize,
    tile: u32,
    fill: T,
) -> impl Iterator<Item = Vec<T>> + 'a {
    let (columns, rows) = grid(width, height, tile);
    (0..rows).flat_map(move |row| {
        (0..columns).map(move |column| {
            extract(data, width, height, samples, tile, column, row, fill)
        })
    })
}
