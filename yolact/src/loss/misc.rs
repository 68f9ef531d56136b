/// How per-element losses are combined into a scalar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reduction {
    Sum,
    /// Averages over elements. An empty input reduces to zero.
    Mean,
}

impl Reduction {
    pub fn reduce<I>(self, values: I) -> f64
    where
        I: IntoIterator<Item = f64>,
    {
        match self {
            Self::Sum => values.into_iter().sum(),
            Self::Mean => {
                let (sum, count) = values
                    .into_iter()
                    .fold((0.0, 0usize), |(sum, count), value| (sum + value, count + 1));
                if count == 0 {
                    0.0
                } else {
                    sum / count as f64
                }
            }
        }
    }
}
