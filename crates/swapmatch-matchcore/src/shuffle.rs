//! The commit-reveal shuffle.
//!
//! After the preimage round, the matcher derives a seed that no single
//! party, the server operator included, could have predicted before
//! every surviving order's preimage was revealed:
//!
//! ```text
//! csum = SHA-256(commitment_1 || commitment_2 || ...)    sorted by order ID
//! seed = SHA-256(csum || preimage_1 || preimage_2 || ...) sorted by order ID
//! ```
//!
//! The seed drives a Fisher-Yates shuffle over a uniform integer
//! generator, so any auditor holding the archived epoch can replay the
//! exact processing order.

use sha2::{Digest, Sha256};
use swapmatch_types::{Commitment, Order, Preimage};

/// The commitment checksum over all epoch orders' commitments, in sorted
/// order-ID order.
#[must_use]
pub fn commitment_checksum(commits_sorted: &[Commitment]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for commit in commits_sorted {
        hasher.update(commit.0);
    }
    hasher.finalize().into()
}

/// The shuffle seed: the checksum concatenated with the revealed
/// preimages, in sorted order-ID order.
#[must_use]
pub fn shuffle_seed(csum: &[u8; 32], preimages_sorted: &[Preimage]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(csum);
    for pi in preimages_sorted {
        hasher.update(pi.0);
    }
    hasher.finalize().into()
}

/// A deterministic uniform integer generator: SHA-256 in counter mode
/// over the seed. Not a general-purpose PRNG; it exists so the shuffle
/// is reproducible from the archived seed alone.
#[derive(Debug)]
pub struct HashPrng {
    seed: [u8; 32],
    counter: u64,
    buf: [u8; 32],
    used: usize,
}

impl HashPrng {
    #[must_use]
    pub fn new(seed: [u8; 32]) -> Self {
        Self {
            seed,
            counter: 0,
            buf: [0; 32],
            used: 32,
        }
    }

    fn refill(&mut self) {
        let mut hasher = Sha256::new();
        hasher.update(self.seed);
        hasher.update(self.counter.to_be_bytes());
        self.buf = hasher.finalize().into();
        self.counter += 1;
        self.used = 0;
    }

    /// The next raw 8 bytes of the hash stream as a big-endian u64.
    pub fn next_u64(&mut self) -> u64 {
        if self.used + 8 > self.buf.len() {
            self.refill();
        }
        let chunk: [u8; 8] = self.buf[self.used..self.used + 8].try_into().unwrap();
        self.used += 8;
        u64::from_be_bytes(chunk)
    }

    /// A uniform draw from `[0, bound)` using rejection sampling, so the
    /// distribution carries no modulo bias.
    pub fn uniform(&mut self, bound: u64) -> u64 {
        assert!(bound > 0, "uniform bound must be positive");
        if bound.is_power_of_two() {
            return self.next_u64() & (bound - 1);
        }
        let zone = u64::MAX - (u64::MAX % bound);
        loop {
            let v = self.next_u64();
            if v < zone {
                return v % bound;
            }
        }
    }
}

/// Fisher-Yates over the order slice, seeded from the epoch seed.
pub fn shuffle_orders(seed: [u8; 32], orders: &mut [Order]) {
    let mut prng = HashPrng::new(seed);
    for i in (1..orders.len()).rev() {
        let j = prng.uniform(i as u64 + 1) as usize;
        orders.swap(i, j);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swapmatch_types::order::test_orders;
    use swapmatch_types::OrderId;

    #[test]
    fn checksum_depends_on_order_and_content() {
        let a = Commitment([1; 32]);
        let b = Commitment([2; 32]);
        assert_eq!(commitment_checksum(&[a, b]), commitment_checksum(&[a, b]));
        assert_ne!(commitment_checksum(&[a, b]), commitment_checksum(&[b, a]));
        assert_ne!(
            commitment_checksum(&[a]),
            commitment_checksum(&[Commitment([3; 32])])
        );
    }

    #[test]
    fn seed_changes_with_any_preimage() {
        let csum = [7u8; 32];
        let pis = vec![Preimage([1; 32]), Preimage([2; 32])];
        let seed = shuffle_seed(&csum, &pis);
        assert_eq!(seed, shuffle_seed(&csum, &pis));

        let mut tweaked = pis.clone();
        tweaked[1] = Preimage([3; 32]);
        assert_ne!(seed, shuffle_seed(&csum, &tweaked));
        assert_ne!(seed, shuffle_seed(&[8u8; 32], &pis));
    }

    #[test]
    fn prng_is_deterministic() {
        let mut a = HashPrng::new([5; 32]);
        let mut b = HashPrng::new([5; 32]);
        for _ in 0..100 {
            assert_eq!(a.next_u64(), b.next_u64());
        }
        let mut c = HashPrng::new([6; 32]);
        assert_ne!(a.next_u64(), c.next_u64());
    }

    #[test]
    fn uniform_stays_in_bounds() {
        let mut prng = HashPrng::new([9; 32]);
        for bound in [1u64, 2, 3, 7, 10, 1 << 32] {
            for _ in 0..200 {
                assert!(prng.uniform(bound) < bound);
            }
        }
    }

    #[test]
    fn uniform_covers_small_range() {
        let mut prng = HashPrng::new([11; 32]);
        let mut seen = [false; 5];
        for _ in 0..500 {
            seen[prng.uniform(5) as usize] = true;
        }
        assert!(seen.iter().all(|&s| s), "all residues should appear");
    }

    #[test]
    fn shuffle_is_reproducible_and_permutes() {
        let mut orders: Vec<Order> = (1..=8u8)
            .map(|i| Order::Limit(test_orders::limit(i, true, 1_000_000, 100, 5_000)))
            .collect();
        let original: Vec<OrderId> = orders.iter().map(Order::id).collect();

        let seed = [42u8; 32];
        shuffle_orders(seed, &mut orders);
        let first: Vec<OrderId> = orders.iter().map(Order::id).collect();

        // Same seed over the same starting arrangement replays identically.
        let mut again: Vec<Order> = original
            .iter()
            .map(|oid| {
                orders
                    .iter()
                    .find(|o| o.id() == *oid)
                    .cloned()
                    .unwrap()
            })
            .collect();
        shuffle_orders(seed, &mut again);
        let second: Vec<OrderId> = again.iter().map(Order::id).collect();
        assert_eq!(first, second);

        // Still the same multiset of orders.
        let mut sorted_first = first.clone();
        sorted_first.sort_unstable();
        let mut sorted_orig = original.clone();
        sorted_orig.sort_unstable();
        assert_eq!(sorted_first, sorted_orig);

        // A different seed gives a different arrangement (with 8! options
        // a collision would indicate a broken generator).
        let mut other = again;
        shuffle_orders([43u8; 32], &mut other);
        let third: Vec<OrderId> = other.iter().map(Order::id).collect();
        assert_ne!(second, third);
    }

    #[test]
    fn shuffle_of_one_is_noop() {
        let mut orders = vec![Order::Limit(test_orders::limit(1, true, 1, 100, 0))];
        let before = orders[0].id();
        shuffle_orders([0; 32], &mut orders);
        assert_eq!(orders[0].id(), before);
    }
}
