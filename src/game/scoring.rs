use super::player::Player;

pub fn award_point(player: &mut Player) {
    player.points = player.points.saturating_add(1);
}

/// Every player holding the highest score. Ties yield several winners;
/// the result is empty only for an empty input.
pub fn resolve_winners(players: &[Player]) -> Vec<&Player> {
    let Some(max_points) = players.iter().map(|p| p.points).max() else {
        return Vec::new();
    };
    players.iter().filter(|p| p.points == max_points).collect()
}
