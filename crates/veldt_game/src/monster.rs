//! The per-monster finite state machine.
//!
//! Every monster cycles through idle -> chase -> attack -> return. The FSM
//! is advanced once per tick by [`Monster::update`], which only *reads*
//! the world: the single mutable thing it touches is the monster itself.
//! Combat lands as an [`AttackEvent`] returned to the simulation loop,
//! which applies it against the player tables synchronously, in the same
//! tick, right after the monster that produced it.

use std::sync::Arc;

use glam::Vec3;
use veldt_nav::NavMesh;
use veldt_protocol::MONSTER_UID_BASE;

use crate::sim::WorldView;

/// Distance at which an idle monster acquires a player target.
pub(crate) const AGGRO_DIST: f32 = 3.0;

/// Chase is abandoned once the target is farther than this.
pub(crate) const GIVE_UP_DIST: f32 = 10.0;

/// The target must move this far from its last known position before the
/// path is recomputed.
pub(crate) const PATH_REPLAN_EPS: f32 = 0.5;

/// Radius within which a waypoint (or the spawn point) counts as reached.
pub(crate) const ARRIVAL_EPS: f32 = 0.1;

/// Positional changes at or below this threshold skip zone maintenance.
pub(crate) const MOVE_EPSILON: f32 = 0.001;

/// Seconds of accumulated movement between two position broadcasts for one
/// monster. Fine-grained monster motion is not worth streaming per-tick.
pub(crate) const NETWORK_SYNC_INTERVAL: f32 = 2.0;

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub(crate) enum MonsterState {
    Idle,
    Chase,
    Attack,
    Return,
}

#[derive(Copy, Clone, Debug)]
pub(crate) struct MonsterStats {
    pub(crate) max_hp: i32,
    pub(crate) attack_power: i32,
    pub(crate) attack_range: f32,
    pub(crate) attack_cooldown: f32,
    pub(crate) speed: f32,
}

impl Default for MonsterStats {
    fn default() -> Self {
        Self {
            max_hp: 50,
            attack_power: 10,
            attack_range: 1.5,
            attack_cooldown: 2.0,
            speed: 2.0,
        }
    }
}

/// A swing that connected. Damage application, death detection and the
/// resulting broadcasts are the simulation loop's business.
#[derive(Copy, Clone, Debug)]
pub(crate) struct AttackEvent {
    pub(crate) attacker_uid: u64,
    pub(crate) target_uid: u64,
    pub(crate) damage: i32,
}

pub(crate) struct Monster {
    pub(crate) uid: u64,
    pub(crate) pos: Vec3,
    pub(crate) yaw: f32,
    pub(crate) spawn: Vec3,
    pub(crate) state: MonsterState,
    /// Monsters cannot take damage yet (clients have no attack request),
    /// but the stat block is already authoritative for it.
    #[allow(dead_code)]
    pub(crate) hp: i32,
    pub(crate) stats: MonsterStats,
    /// Accumulated seconds of movement since the last position broadcast.
    pub(crate) sync_timer: f32,
    pub(crate) target_uid: Option<u64>,
    target_last_pos: Vec3,
    path: Vec<Vec3>,
    path_index: usize,
    attack_timer: f32,
    nav: Arc<NavMesh>,
}

impl Monster {
    pub(crate) fn new(uid: u64, spawn: Vec3, stats: MonsterStats, nav: Arc<NavMesh>) -> Self {
        debug_assert!(uid >= MONSTER_UID_BASE);

        Self {
            uid,
            pos: spawn,
            yaw: 0.0,
            spawn,
            state: MonsterState::Idle,
            hp: stats.max_hp,
            stats,
            sync_timer: 0.0,
            target_uid: None,
            target_last_pos: Vec3::ZERO,
            path: Vec::new(),
            path_index: 0,
            attack_timer: 0.0,
            nav,
        }
    }

    /// Advances the FSM by one tick.
    pub(crate) fn update(&mut self, dt: f32, world: &WorldView) -> Option<AttackEvent> {
        match self.state {
            MonsterState::Idle => {
                self.update_idle(world);
                None
            }
            MonsterState::Chase => {
                self.update_chase(dt, world);
                None
            }
            MonsterState::Attack => self.update_attack(dt, world),
            MonsterState::Return => {
                self.update_return(dt);
                None
            }
        }
    }

    fn update_idle(&mut self, world: &WorldView) {
        for uid in world.zone.players_in_aoi(self.pos.x, self.pos.y) {
            if uid >= MONSTER_UID_BASE {
                continue;
            }

            let Some(pos) = world.player_pos(uid) else {
                continue;
            };

            if self.pos.distance(pos) <= AGGRO_DIST {
                self.target_uid = Some(uid);
                self.target_last_pos = pos;
                self.calculate_path(pos);
                self.state = MonsterState::Chase;
                return;
            }
        }
    }

    fn update_chase(&mut self, dt: f32, world: &WorldView) {
        let target_pos = self.target_uid.and_then(|uid| world.player_pos(uid));

        let Some(target_pos) = target_pos else {
            self.begin_return();
            return;
        };

        let dist = self.pos.distance(target_pos);

        if dist > GIVE_UP_DIST {
            self.begin_return();
            return;
        }

        if dist <= self.stats.attack_range {
            // In striking distance: stop moving and start the cooldown.
            // The first swing lands on the next tick.
            self.path.clear();
            self.path_index = 0;
            self.attack_timer = self.stats.attack_cooldown;
            self.state = MonsterState::Attack;
            return;
        }

        if target_pos.distance(self.target_last_pos) > PATH_REPLAN_EPS {
            self.target_last_pos = target_pos;
            self.calculate_path(target_pos);
        }

        self.advance_along_path(dt);
    }

    fn update_attack(&mut self, dt: f32, world: &WorldView) -> Option<AttackEvent> {
        self.attack_timer += dt;

        let target_uid = self.target_uid?;

        let Some(target_pos) = world.player_pos(target_uid) else {
            self.begin_return();
            return None;
        };

        let dist = self.pos.distance(target_pos);

        if dist > self.stats.attack_range {
            if dist > GIVE_UP_DIST {
                self.begin_return();
            } else {
                // Still reachable: pick the chase back up.
                self.target_last_pos = target_pos;
                self.calculate_path(target_pos);
                self.state = MonsterState::Chase;
            }
            return None;
        }

        if self.attack_timer >= self.stats.attack_cooldown {
            self.attack_timer = 0.0;

            return Some(AttackEvent {
                attacker_uid: self.uid,
                target_uid,
                damage: self.stats.attack_power,
            });
        }

        None
    }

    fn update_return(&mut self, dt: f32) {
        self.advance_along_path(dt);

        let exhausted = self.path_index >= self.path.len();

        if exhausted || self.pos.distance(self.spawn) <= ARRIVAL_EPS {
            self.pos = self.spawn;
            self.path.clear();
            self.path_index = 0;
            self.state = MonsterState::Idle;
        }
    }

    fn begin_return(&mut self) {
        self.target_uid = None;
        self.calculate_path(self.spawn);
        self.state = MonsterState::Return;
    }

    /// Recomputes the cached path towards `dest`. If the leading waypoint
    /// already sits under the monster, start at the next one so a freshly
    /// planned path does not stall the first tick.
    fn calculate_path(&mut self, dest: Vec3) {
        self.path = self.nav.find_path(self.pos, dest);

        self.path_index = match self.path.first() {
            Some(&first) if self.pos.distance(first) <= ARRIVAL_EPS => 1,
            _ => 0,
        };
    }

    fn advance_along_path(&mut self, dt: f32) {
        let mut budget = self.stats.speed * dt;

        while budget > 0.0 {
            let Some(&waypoint) = self.path.get(self.path_index) else {
                return;
            };

            let to = waypoint - self.pos;
            let dist = to.length();

            if dist <= ARRIVAL_EPS {
                self.path_index += 1;
                continue;
            }

            if budget >= dist {
                self.pos = waypoint;
                self.path_index += 1;
                budget -= dist;
            } else {
                self.pos += to / dist * budget;
                budget = 0.0;
            }

            self.yaw = to.y.atan2(to.x);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use veldt_zone::Zone;

    use super::*;
    use crate::sim::PlayerInfo;

    struct Fixture {
        zone: Zone,
        accounts: HashMap<String, PlayerInfo>,
        uid_to_account: HashMap<u64, String>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                zone: Zone::new(1000, 1000, 50),
                accounts: HashMap::new(),
                uid_to_account: HashMap::new(),
            }
        }

        fn add_player(&mut self, account: &str, uid: u64, x: f32, y: f32) {
            self.accounts.insert(
                account.to_owned(),
                PlayerInfo {
                    uid,
                    pos: Vec3::new(x, y, 0.0),
                    yaw: 0.0,
                    hp: 100,
                },
            );
            self.uid_to_account.insert(uid, account.to_owned());
            self.zone.enter(uid, x, y);
        }

        fn view(&self) -> WorldView<'_> {
            WorldView {
                zone: &self.zone,
                accounts: &self.accounts,
                uid_to_account: &self.uid_to_account,
            }
        }
    }

    fn monster_at(x: f32, y: f32) -> Monster {
        Monster::new(
            MONSTER_UID_BASE,
            Vec3::new(x, y, 0.0),
            MonsterStats::default(),
            Arc::new(NavMesh::new()),
        )
    }

    #[test]
    fn idle_acquires_a_player_within_aggro_range() {
        let mut fixture = Fixture::new();
        fixture.add_player("AAA", 1, 6.0, 45.0);

        let mut monster = monster_at(5.0, 45.0);
        monster.update(0.1, &fixture.view());

        assert_eq!(monster.state, MonsterState::Chase);
        assert_eq!(monster.target_uid, Some(1));
    }

    #[test]
    fn idle_ignores_players_beyond_aggro_range() {
        let mut fixture = Fixture::new();
        // Same sector, but outside AGGRO_DIST.
        fixture.add_player("AAA", 1, 20.0, 45.0);

        let mut monster = monster_at(5.0, 45.0);
        monster.update(0.1, &fixture.view());

        assert_eq!(monster.state, MonsterState::Idle);
        assert_eq!(monster.target_uid, None);
    }

    #[test]
    fn idle_ignores_other_monsters() {
        let mut fixture = Fixture::new();
        fixture.zone.enter(MONSTER_UID_BASE + 1, 5.0, 45.0);

        let mut monster = monster_at(5.0, 45.0);
        monster.update(0.1, &fixture.view());

        assert_eq!(monster.state, MonsterState::Idle);
    }

    #[test]
    fn chase_moves_towards_the_target() {
        let mut fixture = Fixture::new();
        fixture.add_player("AAA", 1, 5.0, 48.0);

        let mut monster = monster_at(5.0, 45.0);
        monster.update(0.1, &fixture.view());
        assert_eq!(monster.state, MonsterState::Chase);

        let before = monster.pos.distance(Vec3::new(5.0, 48.0, 0.0));
        monster.update(0.1, &fixture.view());
        let after = monster.pos.distance(Vec3::new(5.0, 48.0, 0.0));

        // speed * dt closer, straight-line path from the unloaded mesh.
        assert!(after < before);
        assert!((before - after - 0.2).abs() < 1e-3);
    }

    #[test]
    fn chase_enters_attack_within_range_and_swings_after_cooldown() {
        let mut fixture = Fixture::new();
        fixture.add_player("AAA", 1, 5.0, 46.0);

        let mut monster = monster_at(5.0, 45.0);
        monster.update(0.1, &fixture.view()); // Idle -> Chase
        monster.update(0.1, &fixture.view()); // Chase -> Attack (dist 1.0 <= 1.5)
        assert_eq!(monster.state, MonsterState::Attack);

        let event = monster.update(0.1, &fixture.view()).expect("first swing");
        assert_eq!(event.attacker_uid, monster.uid);
        assert_eq!(event.target_uid, 1);
        assert_eq!(event.damage, MonsterStats::default().attack_power);

        // The next swing waits a full cooldown.
        assert!(monster.update(0.1, &fixture.view()).is_none());
    }

    #[test]
    fn chase_gives_up_when_the_target_escapes() {
        let mut fixture = Fixture::new();
        fixture.add_player("AAA", 1, 5.0, 47.0);

        let mut monster = monster_at(5.0, 45.0);
        monster.update(0.1, &fixture.view());
        assert_eq!(monster.state, MonsterState::Chase);

        // Teleport the player far away.
        fixture.accounts.get_mut("AAA").unwrap().pos = Vec3::new(500.0, 500.0, 0.0);

        monster.update(0.1, &fixture.view());
        assert_eq!(monster.state, MonsterState::Return);
        assert_eq!(monster.target_uid, None);
    }

    #[test]
    fn attack_resumes_chase_when_target_backs_off() {
        let mut fixture = Fixture::new();
        fixture.add_player("AAA", 1, 5.0, 46.0);

        let mut monster = monster_at(5.0, 45.0);
        monster.update(0.1, &fixture.view()); // -> Chase
        monster.update(0.1, &fixture.view()); // -> Attack

        fixture.accounts.get_mut("AAA").unwrap().pos = Vec3::new(5.0, 50.0, 0.0);

        monster.update(0.1, &fixture.view());
        assert_eq!(monster.state, MonsterState::Chase);
    }

    #[test]
    fn attack_returns_home_when_the_target_vanishes() {
        let mut fixture = Fixture::new();
        fixture.add_player("AAA", 1, 5.0, 46.0);

        let mut monster = monster_at(5.0, 45.0);
        monster.update(0.1, &fixture.view()); // -> Chase
        monster.update(0.1, &fixture.view()); // -> Attack

        fixture.accounts.remove("AAA");
        fixture.uid_to_account.remove(&1);

        monster.update(0.1, &fixture.view());
        assert_eq!(monster.state, MonsterState::Return);
    }

    #[test]
    fn return_walks_home_and_snaps_onto_the_spawn() {
        let mut fixture = Fixture::new();
        fixture.add_player("AAA", 1, 7.0, 45.0);

        let mut monster = monster_at(5.0, 45.0);
        monster.update(0.1, &fixture.view()); // -> Chase
        monster.update(0.1, &fixture.view()); // walk a step off the spawn
        assert!(monster.pos.distance(Vec3::new(5.0, 45.0, 0.0)) > MOVE_EPSILON);

        fixture.accounts.get_mut("AAA").unwrap().pos = Vec3::new(900.0, 900.0, 0.0);
        monster.update(0.1, &fixture.view()); // -> Return

        for _ in 0..100 {
            monster.update(0.1, &fixture.view());
            if monster.state == MonsterState::Idle {
                break;
            }
        }

        assert_eq!(monster.state, MonsterState::Idle);
        assert_eq!(monster.pos, Vec3::new(5.0, 45.0, 0.0));
    }

    #[test]
    fn fresh_path_does_not_stall_on_its_leading_waypoint() {
        let mut fixture = Fixture::new();
        fixture.add_player("AAA", 1, 7.0, 45.0);

        let mut monster = monster_at(5.0, 45.0);
        monster.update(0.1, &fixture.view()); // -> Chase, path [self, target]

        let before = monster.pos;
        monster.update(0.1, &fixture.view());

        // Waypoint 0 is the monster's own position; index must have
        // started past it so the very first tick makes progress.
        assert!(monster.pos.distance(before) > 0.0);
    }
}
