use rand::seq::SliceRandom;

/// Base URL of one mirror, without a trailing slash.
pub type Endpoint = String;

/// Candidate mirrors, shuffled once so load spreads across them.
#[derive(Debug, Clone)]
pub struct EndpointPool {
    endpoints: Vec<Endpoint>,
}

impl EndpointPool {
    /// Build a shuffled pool. Returns `None` when no usable URL is given.
    pub fn new<I, S>(urls: I) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut pool = Self::ordered(urls)?;
        let mut rng = rand::rng();
        pool.endpoints.shuffle(&mut rng);
        Some(pool)
    }

    /// Build a pool that keeps the given order.
    pub fn ordered<I, S>(urls: I) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut endpoints: Vec<Endpoint> = Vec::new();
        for url in urls {
            let url = normalize_endpoint(url.as_ref());
            if !url.is_empty() && !endpoints.contains(&url) {
                endpoints.push(url);
            }
        }
        if endpoints.is_empty() {
            None
        } else {
            Some(Self { endpoints })
        }
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

pub fn normalize_endpoint(url: &str) -> Endpoint {
    url.trim().trim_end_matches('/').to_string()
}

/// Which rule placed a batch of endpoints in the attempt order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierKind {
    Override,
    Sticky,
    Race,
    Remainder,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tier {
    pub kind: TierKind,
    pub endpoints: Vec<Endpoint>,
}

/// Attempt order for one request.
///
/// Override alone, else sticky-best alone, then the first `race_size` pool
/// members not already placed, then everything left. Tiers are disjoint and
/// empty ones are left out.
pub fn pick_order(
    user_override: Option<&str>,
    sticky_best: Option<&str>,
    pool: &EndpointPool,
    race_size: usize,
) -> Vec<Tier> {
    let mut tiers = Vec::with_capacity(3);
    let mut placed: Vec<&str> = Vec::new();

    if let Some(o) = user_override {
        tiers.push(Tier {
            kind: TierKind::Override,
            endpoints: vec![o.to_string()],
        });
        placed.push(o);
    } else if let Some(s) = sticky_best {
        tiers.push(Tier {
            kind: TierKind::Sticky,
            endpoints: vec![s.to_string()],
        });
        placed.push(s);
    }

    let rest: Vec<Endpoint> = pool
        .endpoints()
        .iter()
        .filter(|e| !placed.contains(&e.as_str()))
        .cloned()
        .collect();
    let split = race_size.max(1).min(rest.len());
    let (race, remainder) = rest.split_at(split);

    if !race.is_empty() {
        tiers.push(Tier {
            kind: TierKind::Race,
            endpoints: race.to_vec(),
        });
    }
    if !remainder.is_empty() {
        tiers.push(Tier {
            kind: TierKind::Remainder,
            endpoints: remainder.to_vec(),
        });
    }
    tiers
}
