//! Tracker domain table and hostname matching.
//!
//! The table is an ordered slice, not a map: matching walks it top to bottom
//! and the first fragment contained in the hostname wins. Fragments that are
//! more specific than a later one (e.g. `fmfmobile.icloud` before a generic
//! `icloud` entry, if one is ever added) must therefore come first.

/// Built-in fragment → service table of known location-tracking services.
pub const TRACKER_DOMAINS: &[(&str, &str)] = &[
    ("life360",              "Life360"),
    ("fmfmobile.icloud",     "Apple Find My Friends"),
    ("fmip.icloud",          "Apple Find My iPhone"),
    ("findmymobile.samsung", "Samsung Find My Mobile"),
    ("footprints-pa",        "Google Location History"),
    ("thetileapp",           "Tile"),
    ("glympse",              "Glympse"),
    ("zenly",                "Zenly"),
    ("foursquare",           "Foursquare"),
    ("geozilla",             "GeoZilla"),
    ("findmykids",           "Findmykids"),
    ("familo",               "Familonet"),
    ("tracki.com",           "Tracki"),
    ("mmguardian",           "MMGuardian"),
    ("qustodio",             "Qustodio"),
    ("bark.us",              "Bark"),
    ("thetruthspy",          "TheTruthSpy"),
    ("mspy",                 "mSpy"),
    ("flexispy",             "FlexiSPY"),
    ("xnspy",                "XNSPY"),
    ("spyic",                "Spyic"),
    ("spyzie",               "Spyzie"),
    ("cocospy",              "Cocospy"),
    ("eyezy",                "Eyezy"),
    ("umobix",               "uMobix"),
    ("hoverwatch",           "Hoverwatch"),
    ("clevguard",            "KidsGuard"),
    ("trackview",            "TrackView"),
    ("cerberusapp",          "Cerberus"),
    ("preyproject",          "Prey"),
];

/// Case-insensitive substring matcher over an ordered domain table.
#[derive(Debug, Clone, Copy)]
pub struct DomainMatcher {
    table: &'static [(&'static str, &'static str)],
}

impl Default for DomainMatcher {
    fn default() -> Self {
        Self::new(TRACKER_DOMAINS)
    }
}

impl DomainMatcher {
    /// Creates a matcher over `table`. Fragments must be lower-case.
    pub fn new(table: &'static [(&'static str, &'static str)]) -> Self {
        Self { table }
    }

    /// Returns the service name of the first fragment contained in `hostname`.
    ///
    /// Matching is substring, not suffix: `sub.api.life360.com.evil.test`
    /// matches `life360` just like `api.life360.com` does.
    pub fn match_domain(&self, hostname: &str) -> Option<&'static str> {
        let host = hostname.to_lowercase();
        self.table
            .iter()
            .find(|(fragment, _)| host.contains(fragment))
            .map(|(_, service)| *service)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

/// Matches `hostname` against the built-in tracker table.
pub fn match_domain(hostname: &str) -> Option<&'static str> {
    DomainMatcher::default().match_domain(hostname)
}
