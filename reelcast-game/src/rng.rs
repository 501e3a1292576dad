//! Seeded, domain-separated random streams for the reward engine.
use hmac::{Hmac, Mac};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use sha2::Sha256;

/// Independent RNG streams so that changing one roll table does not shift
/// the draws seen by another.
#[derive(Debug, Clone)]
pub struct RngBundle {
    seed: u64,
    catch: CountingRng<ChaCha20Rng>,
    loot: CountingRng<ChaCha20Rng>,
    magnitude: CountingRng<ChaCha20Rng>,
}

impl RngBundle {
    /// Construct the bundle from a user-visible seed.
    #[must_use]
    pub fn from_user_seed(seed: u64) -> Self {
        Self {
            seed,
            catch: CountingRng::new(derive_stream_seed(seed, b"catch")),
            loot: CountingRng::new(derive_stream_seed(seed, b"loot")),
            magnitude: CountingRng::new(derive_stream_seed(seed, b"magnitude")),
        }
    }

    /// Seed the bundle was derived from.
    #[must_use]
    pub const fn seed(&self) -> u64 {
        self.seed
    }

    /// Species, rare-species and weight rolls.
    pub const fn catch(&mut self) -> &mut CountingRng<ChaCha20Rng> {
        &mut self.catch
    }

    /// Loot rolls (junk, upgrade, downgrade) paired with the stream for
    /// randomized modifier magnitudes and bait amounts.
    pub const fn loot_streams(
        &mut self,
    ) -> (&mut CountingRng<ChaCha20Rng>, &mut CountingRng<ChaCha20Rng>) {
        (&mut self.loot, &mut self.magnitude)
    }

    /// Draw counts per stream as `(catch, loot, magnitude)`.
    #[must_use]
    pub const fn draws(&self) -> (u64, u64, u64) {
        (self.catch.draws(), self.loot.draws(), self.magnitude.draws())
    }
}

/// Counting wrapper for RNG streams providing instrumentation.
#[derive(Debug, Clone)]
pub struct CountingRng<R> {
    rng: R,
    draws: u64,
}

impl CountingRng<ChaCha20Rng> {
    fn new(seed: u64) -> Self {
        Self {
            rng: ChaCha20Rng::seed_from_u64(seed),
            draws: 0,
        }
    }
}

impl<R: rand::RngCore> CountingRng<R> {
    /// Number of draw calls performed against this stream.
    #[must_use]
    pub const fn draws(&self) -> u64 {
        self.draws
    }
}

impl<R: rand::RngCore> rand::RngCore for CountingRng<R> {
    fn next_u32(&mut self) -> u32 {
        self.draws = self.draws.saturating_add(1);
        self.rng.next_u32()
    }

    fn next_u64(&mut self) -> u64 {
        self.draws = self.draws.saturating_add(1);
        self.rng.next_u64()
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.draws = self.draws.saturating_add(1);
        self.rng.fill_bytes(dest);
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.draws = self.draws.saturating_add(1);
        self.rng.try_fill_bytes(dest)
    }
}

fn derive_stream_seed(user_seed: u64, domain_tag: &[u8]) -> u64 {
    // HMAC accepts keys of any length.
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(&user_seed.to_le_bytes()) else {
        return user_seed;
    };
    mac.update(domain_tag);
    let digest = mac.finalize().into_bytes();
    let mut seed_bytes = [0_u8; 8];
    seed_bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(seed_bytes)
}
