//! Cumulative TPR/FPR curves over one ranked column.

use std::cmp::Ordering;

/// One column's rows in descending value order with running rates.
#[derive(Debug, Clone, PartialEq)]
pub struct Ranking {
    /// Row indices, highest value first.
    pub order: Vec<usize>,
    pub tpr: Vec<f64>,
    pub fpr: Vec<f64>,
    /// `tpr[i] - fpr[i]`.
    pub diff: Vec<f64>,
    pub tp_total: usize,
    pub fp_total: usize,
}

/// Sort descending by `values` and accumulate the label columns.
///
/// The sort is stable, so tied values keep their row order. A label column
/// with no positive rows has its rate fixed at 0 for every rank.
pub fn rank_column(values: &[f64], tp: &[bool], fp: &[bool]) -> Ranking {
    let mut order = (0..values.len()).collect::<Vec<_>>();
    order.sort_by(|&a, &b| {
        values[b]
            .partial_cmp(&values[a])
            .unwrap_or(Ordering::Equal)
    });

    let tp_total = tp.iter().filter(|&&flag| flag).count();
    let fp_total = fp.iter().filter(|&&flag| flag).count();

    let mut tpr = Vec::with_capacity(order.len());
    let mut fpr = Vec::with_capacity(order.len());
    let mut diff = Vec::with_capacity(order.len());
    let (mut tp_seen, mut fp_seen) = (0usize, 0usize);
    for &row in &order {
        tp_seen += usize::from(tp[row]);
        fp_seen += usize::from(fp[row]);
        let t = rate(tp_seen, tp_total);
        let f = rate(fp_seen, fp_total);
        tpr.push(t);
        fpr.push(f);
        diff.push(t - f);
    }

    Ranking {
        order,
        tpr,
        fpr,
        diff,
        tp_total,
        fp_total,
    }
}

fn rate(seen: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        seen as f64 / total as f64
    }
}

/// Position of the maximal `TPR - FPR`, first occurrence on ties.
pub fn cutoff_rank(diff: &[f64]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (rank, &value) in diff.iter().enumerate() {
        match best {
            Some((_, top)) if value <= top => {}
            _ => best = Some((rank, value)),
        }
    }
    best.map(|(rank, _)| rank)
}

/// Trapezoidal area under the (FPR, TPR) curve, starting at the origin.
pub fn auc(fpr: &[f64], tpr: &[f64]) -> f64 {
    let mut area = 0.0;
    let (mut x0, mut y0) = (0.0, 0.0);
    for (&x, &y) in fpr.iter().zip(tpr) {
        area += (x - x0) * (y + y0) / 2.0;
        x0 = x;
        y0 = y;
    }
    area
}
