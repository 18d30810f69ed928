/// Limit how far `target` may move away from `current` in one tick.
///
/// A `max_change` of 0 disables limiting and returns `target` unchanged.
/// The caller keeps `current` (its previous output) between ticks.
pub fn slew(target: f64, current: f64, max_change: f64) -> f64 {
    if max_change == 0.0 {
        return target;
    }
    let max_change = max_change.abs();
    current + (target - current).clamp(-max_change, max_change)
}
