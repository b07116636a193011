//! Timeout-bounded peer discovery
//!
//! Scouting needs no open session: it broadcasts one probe and collects
//! hello responses until the window elapses. Zero responders is a
//! normal outcome, not an error.

use std::time::Duration;

use tokio::time::{timeout, Instant};
use tracing::{debug, info};
use wisp_link::scout::UdpScout;
use wisp_link::{Hello, ScoutMedium, WhatAmIMatcher};

use crate::config::{Config, ScoutConfig};
use crate::error::SessionError;

/// Probes the configured multicast group and runs `handler` for every
/// hello from a role selected by `what`.
///
/// Returns the number of accepted hellos once the configured scouting
/// timeout elapses.
pub async fn scout<H>(
    what: WhatAmIMatcher,
    config: &Config,
    handler: H,
) -> Result<usize, SessionError>
where
    H: FnMut(Hello),
{
    let scouting = ScoutConfig::from_config(config)?;
    let medium = UdpScout::open(scouting.address).await?;
    scout_with(medium, what, scouting.timeout, handler).await
}

/// [`scout`] over an explicit medium and window.
pub async fn scout_with<M, H>(
    mut medium: M,
    what: WhatAmIMatcher,
    window: Duration,
    mut handler: H,
) -> Result<usize, SessionError>
where
    M: ScoutMedium,
    H: FnMut(Hello),
{
    medium.send_probe(what).await?;
    let deadline = Instant::now() + window;
    let mut count = 0usize;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        match timeout(remaining, medium.recv_hello()).await {
            Err(_) => break,
            Ok(Ok(hello)) => {
                if what.matches(hello.whatami) {
                    debug!("scout: hello from {} {}", hello.whatami, hello.zid);
                    handler(hello);
                    count += 1;
                } else {
                    debug!("scout: ignoring {} hello", hello.whatami);
                }
            }
            Ok(Err(err)) => return Err(err.into()),
        }
    }
    info!("scouting window closed, {} hellos", count);
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant as StdInstant;
    use wisp_link::{LinkError, PeerId, WhatAmI};

    /// Scripted medium: yields its hellos then blocks forever.
    struct ScriptedMedium {
        hellos: Vec<Hello>,
    }

    #[async_trait::async_trait]
    impl ScoutMedium for ScriptedMedium {
        async fn send_probe(&mut self, _what: WhatAmIMatcher) -> Result<(), LinkError> {
            Ok(())
        }

        async fn recv_hello(&mut self) -> Result<Hello, LinkError> {
            match self.hellos.pop() {
                Some(hello) => Ok(hello),
                // silent network: block until the window cancels us
                None => std::future::pending().await,
            }
        }
    }

    fn hello(whatami: WhatAmI) -> Hello {
        Hello {
            zid: PeerId::random(),
            whatami,
            locators: vec!["tcp/127.0.0.1:7447".to_string()],
        }
    }

    #[tokio::test]
    async fn zero_responders_returns_after_window() {
        let medium = ScriptedMedium { hellos: Vec::new() };
        let window = Duration::from_millis(100);
        let begun = StdInstant::now();
        let count = scout_with(medium, WhatAmIMatcher::default(), window, |_hello| {})
            .await
            .unwrap();
        assert_eq!(count, 0);
        let waited = begun.elapsed();
        assert!(waited >= window);
        assert!(waited < window + Duration::from_secs(1));
    }

    #[tokio::test]
    async fn collects_matching_hellos() {
        let medium = ScriptedMedium {
            hellos: vec![hello(WhatAmI::Router), hello(WhatAmI::Client)],
        };
        let mut seen = Vec::new();
        let count = scout_with(
            medium,
            WhatAmIMatcher::ROUTER | WhatAmIMatcher::PEER,
            Duration::from_millis(100),
            |hello| seen.push(hello.whatami),
        )
        .await
        .unwrap();
        // the client hello is filtered out by the matcher
        assert_eq!(count, 1);
        assert_eq!(seen, vec![WhatAmI::Router]);
    }
}
