use crate::error::GatewayError;

/// Fixed table of world (game shard) server addresses.
///
/// World ids are 1-based and map directly onto table positions; the platform
/// has exactly twenty worlds and assigns each account to one of them.
const WORLD_IPS: [&str; 20] = [
    "203.104.209.71",
    "203.104.209.87",
    "125.6.184.16",
    "125.6.187.205",
    "125.6.187.229",
    "125.6.187.253",
    "125.6.188.25",
    "203.104.248.135",
    "125.6.189.7",
    "125.6.189.39",
    "125.6.189.71",
    "125.6.189.103",
    "125.6.189.135",
    "125.6.189.167",
    "125.6.189.215",
    "125.6.189.247",
    "203.104.209.23",
    "203.104.209.39",
    "203.104.209.55",
    "203.104.209.102",
];

/// Resolve a 1-based world id to its server address.
pub fn lookup(world_id: u32) -> Result<&'static str, GatewayError> {
    if world_id == 0 || world_id as usize > WORLD_IPS.len() {
        return Err(GatewayError::WorldLookupFailed);
    }
    Ok(WORLD_IPS[world_id as usize - 1])
}
