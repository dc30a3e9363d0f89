use splat_table::DataTable;

/// Runs of identical Morton codes longer than this get re-sorted with
/// tighter bounds.
const MAX_RUN: usize = 256;

/// Spreads the low 10 bits of `x` so they occupy every third bit.
pub fn part1_by2(x: u32) -> u32 {
    let mut x = x & 0x3ff;
    x = (x | (x << 16)) & 0x030000ff;
    x = (x | (x << 8)) & 0x0300f00f;
    x = (x | (x << 4)) & 0x030c30c3;
    x = (x | (x << 2)) & 0x09249249;
    x
}

/// 30-bit Morton code from three 10-bit components.
pub fn morton3(ix: u32, iy: u32, iz: u32) -> u32 {
    (part1_by2(iz) << 2) | (part1_by2(iy) << 1) | part1_by2(ix)
}

/// Computes Morton codes for the referenced points against their own
/// bounding box. Returns `None` when ordering is undefined: any non-finite
/// extent, or all points coincident.
fn codes_for(
    x: &dyn Fn(usize) -> f64,
    y: &dyn Fn(usize) -> f64,
    z: &dyn Fn(usize) -> f64,
    indices: &[usize],
) -> Option<Vec<u32>> {
    let mut min = [f64::INFINITY; 3];
    let mut max = [f64::NEG_INFINITY; 3];
    for &i in indices {
        let p = [x(i), y(i), z(i)];
        for axis in 0..3 {
            min[axis] = min[axis].min(p[axis]);
            max[axis] = max[axis].max(p[axis]);
        }
    }

    let extent = [max[0] - min[0], max[1] - min[1], max[2] - min[2]];
    if extent.iter().any(|e| !e.is_finite()) {
        return None;
    }
    if extent.iter().all(|&e| e == 0.0) {
        return None;
    }

    let quantize = |v: f64, axis: usize| -> u32 {
        if extent[axis] <= 0.0 {
            return 0;
        }
        (((v - min[axis]) * 1024.0 / extent[axis]) as i64).clamp(0, 1023) as u32
    };

    Some(
        indices
            .iter()
            .map(|&i| {
                morton3(
                    quantize(x(i), 0),
                    quantize(y(i), 1),
                    quantize(z(i), 2),
                )
            })
            .collect(),
    )
}

fn sort_recursive(
    x: &dyn Fn(usize) -> f64,
    y: &dyn Fn(usize) -> f64,
    z: &dyn Fn(usize) -> f64,
    indices: &mut [usize],
) {
    let Some(codes) = codes_for(x, y, z, indices) else {
        return;
    };

    // Stable indirect sort by ascending code.
    let mut order: Vec<usize> = (0..indices.len()).collect();
    order.sort_by_key(|&i| codes[i]);
    let sorted: Vec<usize> = order.iter().map(|&i| indices[i]).collect();
    let sorted_codes: Vec<u32> = order.iter().map(|&i| codes[i]).collect();
    indices.copy_from_slice(&sorted);

    // A cell holding too many points is re-sorted against its own, tighter
    // bounds. Terminates because coincident runs produce no codes at all.
    let mut run_start = 0;
    while run_start < indices.len() {
        let code = sorted_codes[run_start];
        let mut run_end = run_start + 1;
        while run_end < indices.len() && sorted_codes[run_end] == code {
            run_end += 1;
        }
        if run_end - run_start > MAX_RUN {
            sort_recursive(x, y, z, &mut indices[run_start..run_end]);
        }
        run_start = run_end;
    }
}

/// Sorts `indices` (row references into `table`) into Morton order over the
/// table's (x, y, z) columns. Leaves the order untouched when the bounding
/// box is degenerate.
pub fn morton_sort(table: &DataTable, indices: &mut [usize]) {
    let (Some(cx), Some(cy), Some(cz)) =
        (table.column("x"), table.column("y"), table.column("z"))
    else {
        return;
    };
    let x = |i: usize| cx.data.get(i);
    let y = |i: usize| cy.data.get(i);
    let z = |i: usize| cz.data.get(i);
    sort_recursive(&x, &y, &z, indices);
}

/// Full-table Morton permutation.
pub fn morton_order(table: &DataTable) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..table.num_rows()).collect();
    morton_sort(table, &mut indices);
    indices
}
