use proptest::prelude::*;

use peeling::annotation::AnnotationSet;
use peeling::dataset::{IdentifierMapping, QuantitativeDataset};
use peeling::engine::{ClassificationEngine, ClassifiedDataset};
use peeling::roc::{cutoff_rank, rank_column};

fn labelled_rows() -> impl Strategy<Value = Vec<(f64, bool, bool)>> {
    prop::collection::vec((-100.0f64..100.0, any::<bool>(), any::<bool>()), 2..60).prop_filter(
        "needs at least one true and one false positive",
        |rows| rows.iter().any(|row| row.1) && rows.iter().any(|row| row.2),
    )
}

/// Rank by hand: stable descending sort, cumulative counts, first argmax.
fn scan_for_cutoff(rows: &[(f64, bool, bool)]) -> (Vec<usize>, Vec<f64>, Vec<f64>, usize) {
    let mut order = (0..rows.len()).collect::<Vec<_>>();
    order.sort_by(|&a, &b| rows[b].0.partial_cmp(&rows[a].0).unwrap());

    let t = rows.iter().filter(|row| row.1).count() as f64;
    let f = rows.iter().filter(|row| row.2).count() as f64;
    let (mut tp, mut fp) = (0usize, 0usize);
    let mut tpr = Vec::new();
    let mut fpr = Vec::new();
    let mut best = 0;
    for (rank, &row) in order.iter().enumerate() {
        if rows[row].1 {
            tp += 1;
        }
        if rows[row].2 {
            fp += 1;
        }
        tpr.push(tp as f64 / t);
        fpr.push(fp as f64 / f);
        if tpr[rank] - fpr[rank] > tpr[best] - fpr[best] {
            best = rank;
        }
    }
    (order, tpr, fpr, best)
}

fn classified(rows: &[(Vec<f64>, bool, bool)]) -> ClassifiedDataset {
    let ids = (0..rows.len()).map(|i| format!("P{i:05}")).collect::<Vec<_>>();
    let dataset = QuantitativeDataset {
        columns: (0..rows[0].0.len()).map(|c| format!("s{c}")).collect(),
        values: rows.iter().map(|(values, _, _)| values.clone()).collect(),
        ids: ids.clone(),
    };
    let true_positive = ids
        .iter()
        .zip(rows)
        .filter(|(_, row)| row.1)
        .map(|(id, _)| id.as_str())
        .collect::<AnnotationSet>();
    let false_positive = ids
        .iter()
        .zip(rows)
        .filter(|(_, row)| row.2)
        .map(|(id, _)| id.as_str())
        .collect::<AnnotationSet>();
    ClassifiedDataset::merge(
        &dataset,
        &IdentifierMapping::default(),
        &true_positive,
        &false_positive,
    )
}

proptest! {
    #[test]
    fn cutoff_is_the_first_maximum(rows in labelled_rows()) {
        let values = rows.iter().map(|row| row.0).collect::<Vec<_>>();
        let tp = rows.iter().map(|row| row.1).collect::<Vec<_>>();
        let fp = rows.iter().map(|row| row.2).collect::<Vec<_>>();
        let ranking = rank_column(&values, &tp, &fp);
        let (order, tpr, fpr, best) = scan_for_cutoff(&rows);

        prop_assert_eq!(&ranking.order, &order);
        prop_assert_eq!(&ranking.tpr, &tpr);
        prop_assert_eq!(&ranking.fpr, &fpr);
        prop_assert_eq!(cutoff_rank(&ranking.diff), Some(best));

        let data = classified(
            &rows
                .iter()
                .map(|&(value, tp, fp)| (vec![value], tp, fp))
                .collect::<Vec<_>>(),
        );
        let pass = ClassificationEngine::new(0).column_pass(&data, 0).unwrap();
        prop_assert_eq!(pass.cutoff.rank, best);
        let mut expected = vec![false; rows.len()];
        for &row in &order[..=best] {
            expected[row] = true;
        }
        prop_assert_eq!(pass.include, expected);
    }

    #[test]
    fn raising_tolerance_never_drops_proteins(
        rows in prop::collection::vec(
            (prop::collection::vec(-10.0f64..10.0, 4), any::<bool>(), any::<bool>()),
            1..40,
        )
    ) {
        let data = classified(&rows);
        let (call, _) = ClassificationEngine::new(0).call(&data).unwrap();
        let mut previous = call.selected.len();
        for tolerance in 1..=4 {
            let relaxed = call.with_tolerance(&data, tolerance).unwrap();
            prop_assert!(relaxed.selected.len() >= previous);
            previous = relaxed.selected.len();
        }
        prop_assert_eq!(previous, data.len());
    }
}
