//! Divisor enumeration for grid-shape candidates.

/// All divisors of `p`, found in pairs up to sqrt(p). Order is the
/// discovery order (small divisor, then its cofactor); callers wanting
/// ascending candidates sort the result. Recomputed fresh per call.
pub fn factors_of(p: u64) -> Vec<u64> {
    let mut factors = Vec::new();
    let mut i = 1;
    while i * i <= p {
        if p % i == 0 {
            factors.push(i);
            let cofactor = p / i;
            if cofactor != i {
                factors.push(cofactor);
            }
        }
        i += 1;
    }
    factors
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factors_of_twelve() {
        let mut factors = factors_of(12);
        factors.sort_unstable();
        assert_eq!(factors, vec![1, 2, 3, 4, 6, 12]);
    }

    #[test]
    fn discovery_order_is_paired() {
        assert_eq!(factors_of(12), vec![1, 12, 2, 6, 3, 4]);
    }

    #[test]
    fn perfect_square_root_emitted_once() {
        let mut factors = factors_of(16);
        factors.sort_unstable();
        assert_eq!(factors, vec![1, 2, 4, 8, 16]);
    }

    #[test]
    fn prime_and_unit() {
        assert_eq!(factors_of(1), vec![1]);
        let mut f = factors_of(7);
        f.sort_unstable();
        assert_eq!(f, vec![1, 7]);
    }
}
