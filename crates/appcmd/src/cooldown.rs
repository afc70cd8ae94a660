//! Rate limiting for command invocations: per-bucket token cooldowns and
//! a concurrency cap backed by semaphores.
//!
//! Buckets partition invocations by a caller-chosen dimension (user,
//! channel, guild, ...). Each bucket gets its own token bucket cloned
//! from a template, refilled continuously, so a `rate`/`per` pair means
//! "at most `rate` invocations per `per` seconds, with bursts up to
//! `rate`".
//!
//! Time is passed in explicitly as seconds so tests never have to sleep.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use appcmd_types::{Id, Interaction};
use tokio::sync::{Mutex, Semaphore};

use crate::error::CheckFailure;

/// A continuously-refilled token bucket.
#[derive(Debug, Clone)]
pub struct Cooldown {
    /// Maximum tokens (burst capacity) and invocations per window.
    rate: u32,
    /// Window length in seconds.
    per: f64,
    tokens: f64,
    /// Last refill time, in seconds.
    last: f64,
}

impl Cooldown {
    pub fn new(rate: u32, per: f64) -> Self {
        Cooldown {
            rate,
            per,
            tokens: rate as f64,
            last: 0.0,
        }
    }

    pub fn rate(&self) -> u32 {
        self.rate
    }

    pub fn per(&self) -> f64 {
        self.per
    }

    /// Tokens refilled per second.
    fn refill_rate(&self) -> f64 {
        if self.per > 0.0 {
            self.rate as f64 / self.per
        } else {
            f64::INFINITY
        }
    }

    fn refill(&mut self, now: f64) {
        let elapsed = (now - self.last).max(0.0);
        self.tokens = (self.tokens + elapsed * self.refill_rate()).min(self.rate as f64);
        self.last = now;
    }

    /// Try to consume one token at `now`. Returns the retry-after in
    /// seconds when the bucket is exhausted; the token is only consumed
    /// on success.
    pub fn update_rate_limit(&mut self, now: f64) -> Option<f64> {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            None
        } else {
            let deficit = 1.0 - self.tokens;
            Some(deficit / self.refill_rate())
        }
    }

    /// Whether an invocation at `now` would be rejected, without
    /// consuming a token.
    pub fn is_rate_limited(&self, now: f64) -> bool {
        self.tokens_at(now) < 1.0
    }

    /// Seconds until a token becomes available at `now` (0.0 if one is
    /// available already).
    pub fn get_retry_after(&self, now: f64) -> f64 {
        let tokens = self.tokens_at(now);
        if tokens >= 1.0 {
            0.0
        } else {
            (1.0 - tokens) / self.refill_rate()
        }
    }

    fn tokens_at(&self, now: f64) -> f64 {
        let elapsed = (now - self.last).max(0.0);
        (self.tokens + elapsed * self.refill_rate()).min(self.rate as f64)
    }

    /// Restore the bucket to full capacity.
    pub fn reset(&mut self) {
        self.tokens = self.rate as f64;
        self.last = 0.0;
    }
}

/// The dimension invocations are partitioned on.
#[derive(Clone, Default)]
pub enum BucketType {
    /// One shared bucket for everyone.
    Global,
    /// One bucket per invoking user.
    #[default]
    User,
    /// One bucket per channel.
    Channel,
    /// One bucket per guild; falls back to the invoker in direct
    /// messages.
    Guild,
    /// One bucket per (guild, user) pair.
    Member,
    /// Host-supplied key derivation.
    Custom(Arc<dyn Fn(&Interaction) -> BucketKey + Send + Sync>),
}

impl BucketType {
    /// Derive the bucket key for an invocation event.
    pub fn key(&self, interaction: &Interaction) -> BucketKey {
        let invoker = interaction.invoker().map(|u| u.id).unwrap_or(0);
        match self {
            BucketType::Global => BucketKey::Global,
            BucketType::User => BucketKey::Id(invoker),
            BucketType::Channel => BucketKey::Id(interaction.channel_id.unwrap_or(0)),
            BucketType::Guild => BucketKey::Id(interaction.guild_id.unwrap_or(invoker)),
            BucketType::Member => {
                BucketKey::Pair(interaction.guild_id.unwrap_or(0), invoker)
            }
            BucketType::Custom(derive) => derive(interaction),
        }
    }
}

impl fmt::Debug for BucketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BucketType::Global => "Global",
            BucketType::User => "User",
            BucketType::Channel => "Channel",
            BucketType::Guild => "Guild",
            BucketType::Member => "Member",
            BucketType::Custom(_) => "Custom",
        };
        f.write_str(name)
    }
}

/// A derived bucket key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BucketKey {
    Global,
    Id(Id),
    Pair(Id, Id),
    Custom(String),
}

/// A cooldown template plus the live per-key buckets cloned from it.
#[derive(Debug)]
pub struct CooldownMapping {
    template: Cooldown,
    bucket: BucketType,
    buckets: Mutex<HashMap<BucketKey, Cooldown>>,
}

impl CooldownMapping {
    pub fn new(rate: u32, per: f64, bucket: BucketType) -> Self {
        CooldownMapping {
            template: Cooldown::new(rate, per),
            bucket,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Consume a token from the invocation's bucket, returning the
    /// retry-after when exhausted.
    pub async fn update_rate_limit(&self, interaction: &Interaction, now: f64) -> Option<f64> {
        let key = self.bucket.key(interaction);
        let mut buckets = self.buckets.lock().await;
        buckets
            .entry(key)
            .or_insert_with(|| self.template.clone())
            .update_rate_limit(now)
    }

    pub async fn is_on_cooldown(&self, interaction: &Interaction, now: f64) -> bool {
        let key = self.bucket.key(interaction);
        let buckets = self.buckets.lock().await;
        buckets
            .get(&key)
            .map(|c| c.is_rate_limited(now))
            .unwrap_or(false)
    }

    pub async fn get_retry_after(&self, interaction: &Interaction, now: f64) -> f64 {
        let key = self.bucket.key(interaction);
        let buckets = self.buckets.lock().await;
        buckets.get(&key).map(|c| c.get_retry_after(now)).unwrap_or(0.0)
    }

    /// Restore the invocation's bucket to full capacity.
    pub async fn reset(&self, interaction: &Interaction) {
        let key = self.bucket.key(interaction);
        let mut buckets = self.buckets.lock().await;
        if let Some(cooldown) = buckets.get_mut(&key) {
            cooldown.reset();
        }
    }
}

/// A cap on simultaneous in-flight invocations per bucket.
pub struct MaxConcurrency {
    number: u32,
    per: BucketType,
    /// When true, acquisition waits for a slot instead of failing.
    wait: bool,
    semaphores: Mutex<HashMap<BucketKey, Arc<Semaphore>>>,
}

impl MaxConcurrency {
    pub fn new(number: u32, per: BucketType, wait: bool) -> Self {
        MaxConcurrency {
            number,
            per,
            wait,
            semaphores: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire a slot in the invocation's bucket. The returned permit
    /// releases the slot when dropped, so a callback panic or error can
    /// never leak a slot.
    pub async fn acquire(&self, interaction: &Interaction) -> Result<ConcurrencyPermit, CheckFailure> {
        let key = self.per.key(interaction);
        let semaphore = {
            let mut semaphores = self.semaphores.lock().await;
            Arc::clone(
                semaphores
                    .entry(key)
                    .or_insert_with(|| Arc::new(Semaphore::new(self.number as usize))),
            )
        };

        let permit = if self.wait {
            semaphore.acquire_owned().await.map_err(|_| {
                CheckFailure::MaxConcurrencyReached { limit: self.number }
            })?
        } else {
            semaphore.try_acquire_owned().map_err(|_| {
                CheckFailure::MaxConcurrencyReached { limit: self.number }
            })?
        };

        Ok(ConcurrencyPermit { _permit: permit })
    }
}

impl fmt::Debug for MaxConcurrency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MaxConcurrency")
            .field("number", &self.number)
            .field("per", &self.per)
            .field("wait", &self.wait)
            .finish_non_exhaustive()
    }
}

/// RAII guard for an acquired concurrency slot.
#[derive(Debug)]
pub struct ConcurrencyPermit {
    _permit: tokio::sync::OwnedSemaphorePermit,
}
