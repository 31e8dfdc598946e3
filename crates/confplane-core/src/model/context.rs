use std::collections::HashMap;

/// The map of request attributes (e.g. `{"tier":"gold","userId":"abc"}`)
/// against which override conditions are evaluated.
pub type Context = HashMap<String, serde_json::Value>;
