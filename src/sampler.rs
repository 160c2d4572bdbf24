use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex,
    },
    time::Duration,
};

use anyhow::bail;
use pprof::{protos::Message, ProfilerGuard, ProfilerGuardBuilder};

/// Sampling frequency used for every profiling session.
pub const SAMPLING_FREQUENCY_HZ: i32 = 100;

/// Opaque correlation handle returned by [`Sampler::begin`].
///
/// Ending a session requires the tag its begin call returned, so a stop
/// always acts on the session it started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplerTag(u64);

#[cfg(test)]
impl SamplerTag {
    pub(crate) fn test_tag(raw: u64) -> Self {
        SamplerTag(raw)
    }
}

/// The sampling engine the session controller drives.
///
/// `begin` arms the engine and hands back a tag, `end` disarms it, and
/// `export` yields the pprof-encoded samples collected in between. An
/// empty export means no samples were recorded during the window.
pub trait Sampler: Send + Sync + 'static {
    fn begin(&self, frequency: i32, duration: Duration) -> anyhow::Result<SamplerTag>;
    fn end(&self, tag: SamplerTag) -> anyhow::Result<()>;
    fn export(&self) -> anyhow::Result<Vec<u8>>;
}

/// CPU sampler backed by the `pprof` crate.
pub struct CpuSampler {
    inner: Mutex<Inner>,
    next_tag: AtomicU64,
}

#[derive(Default)]
struct Inner {
    guard: Option<(SamplerTag, ProfilerGuard<'static>)>,
    exported: Option<Vec<u8>>,
}

impl CpuSampler {
    pub fn new() -> Self {
        CpuSampler {
            inner: Mutex::new(Inner::default()),
            next_tag: AtomicU64::new(1),
        }
    }
}

impl Default for CpuSampler {
    fn default() -> Self {
        CpuSampler::new()
    }
}

impl Sampler for CpuSampler {
    fn begin(&self, frequency: i32, _duration: Duration) -> anyhow::Result<SamplerTag> {
        let mut inner = self.inner.lock().unwrap();
        if inner.guard.is_some() {
            bail!("sampling is already in progress");
        }

        // The guard samples until it is dropped in `end`, the duration
        // is enforced by the session controller.
        //
        // The blocklist is required because libunwind is not signal
        // safe. See the backtrace section in the following link:
        // https://docs.rs/crate/pprof
        let guard = ProfilerGuardBuilder::default()
            .frequency(frequency)
            .blocklist(&["libc", "libgcc", "pthread", "vdso"])
            .build()?;

        let tag = SamplerTag(self.next_tag.fetch_add(1, Ordering::Relaxed));
        inner.guard = Some((tag, guard));
        inner.exported = None;
        Ok(tag)
    }

    fn end(&self, tag: SamplerTag) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let Some((started, guard)) = inner.guard.take() else {
            bail!("sampling is not in progress");
        };

        if started != tag {
            inner.guard = Some((started, guard));
            bail!("tag does not match the running session");
        }

        let report = guard.report().build()?;
        drop(guard);

        // An empty report means the process never ran while the signal
        // fired, exporting it would produce a profile with no samples.
        inner.exported = Some(if report.data.is_empty() {
            Vec::new()
        } else {
            report.pprof()?.encode_to_vec()
        });

        Ok(())
    }

    fn export(&self) -> anyhow::Result<Vec<u8>> {
        let mut inner = self.inner.lock().unwrap();
        let Some(exported) = inner.exported.take() else {
            bail!("no profile has been collected");
        };
        Ok(exported)
    }
}
