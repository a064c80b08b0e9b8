//! A simple statistics module with some utility functions such as bucketing values into a histogram.

/// Count `values` into the buckets delimited by ascending `edges`.
///
/// There is one more bucket than there are edges: bucket 0 holds values below `edges[0]`, the
/// last bucket holds values at or above the final edge.
pub fn histogram(values: impl IntoIterator<Item = f64>, edges: &[f64]) -> Vec<usize> {
    let mut counts = vec![0; edges.len() + 1];
    for value in values {
        let bucket = edges.partition_point(|edge| *edge <= value);
        counts[bucket] += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::*;

    #[fixture]
    fn numbers() -> [f64; 10] {
        [9.0, -3.0, 0.0, 0.04, -0.5, 4.9, -8.0, 0.1, -0.1, 0.05]
    }

    #[rstest]
    fn test_histogram(numbers: [f64; 10]) {
        assert_eq!(histogram(numbers, &[-0.1, 0.1]), vec![3, 4, 3]);
        assert_eq!(histogram(numbers, &[]), vec![10]);
    }

    #[rstest]
    fn test_histogram_of_empty_values() {
        assert_eq!(histogram(Vec::<f64>::new(), &[-1., 0., 1.]), vec![0, 0, 0, 0]);
    }
}
