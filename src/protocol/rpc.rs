//! SA-MP RPC payload constructors.
//!
//! RPC packets are carried as regular reliable-ordered payloads whose first
//! byte is [`ID_RPC`] (`0x7C`), followed by the RPC id and its
//! little-endian-encoded arguments. Only the constructors are provided
//! here; when and with which values they are sent is decided by the
//! connection FSM and the external gamemode layer.

use crate::protocol::stream::BitStream;
use crate::protocol::ID_RPC;

pub const RPC_INIT_GAME: u8 = 0x2B;
pub const RPC_SET_SPAWN_INFO: u8 = 0x2C;
pub const RPC_SPAWN_PLAYER: u8 = 0x34;
pub const RPC_TOGGLE_PLAYER_CONTROLLABLE: u8 = 0x15;
pub const RPC_SET_PLAYER_POS: u8 = 0x0C;
pub const RPC_SET_PLAYER_FACING_ANGLE: u8 = 0x13;
pub const RPC_SET_GAME_MODE_TEXT: u8 = 0x3E;
pub const RPC_SET_WEATHER: u8 = 0x0B;
pub const RPC_SET_WORLD_TIME: u8 = 0x29;
pub const RPC_SET_GRAVITY: u8 = 0x92;

/// Wraps an RPC payload into a sendable packet body.
pub fn encode_rpc(payload: &[u8]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(payload.len() + 1);
    packet.push(ID_RPC);
    packet.extend_from_slice(payload);
    packet
}

fn write_bool(bs: &mut BitStream, v: bool) {
    bs.write_u8(u8::from(v));
}

/// `u32` length prefix + raw bytes, the string form used inside RPCs.
fn write_rpc_string(bs: &mut BitStream, s: &str) {
    bs.write_u32_le(s.len() as u32);
    bs.write_bytes(s.as_bytes());
}

/// World setup parameters for the `InitGame` RPC (0.3.7-R2 layout).
///
/// `InitGame` must reach the client before `SetSpawnInfo`.
#[derive(Debug, Clone)]
pub struct InitGameParams {
    pub zone_names: bool,
    pub use_cj_walk: bool,
    pub allow_weapons: bool,
    pub limit_global_chat_radius: bool,
    pub global_chat_radius: f32,
    pub stunt_bonus: bool,
    pub name_tag_draw_distance: f32,
    pub disable_enter_exits: bool,
    pub name_tag_los: bool,
    pub manual_vehicle_engine_and_lights: bool,
    pub spawns_available: u32,
    pub player_id: u16,
    pub show_name_tags: bool,
    pub show_player_markers: u32,
    pub world_time: u8,
    pub weather: u8,
    pub gravity: f32,
    pub lan_mode: bool,
    pub death_drop_money: i32,
    pub instagib: bool,
    pub on_foot_rate: u32,
    pub in_car_rate: u32,
    pub weapon_rate: u32,
    pub multiplier: u32,
    pub lag_compensation: u32,
    pub hostname: String,
    pub vehicle_friendly_fire: bool,
    pub use_player_ped_anims: bool,
    pub world_bounds: [f32; 4],
    pub game_mode_text: String,
    pub map_name: String,
}

impl Default for InitGameParams {
    fn default() -> Self {
        Self {
            zone_names: false,
            use_cj_walk: false,
            allow_weapons: true,
            limit_global_chat_radius: false,
            global_chat_radius: 200.0,
            stunt_bonus: false,
            name_tag_draw_distance: 70.0,
            disable_enter_exits: false,
            name_tag_los: true,
            manual_vehicle_engine_and_lights: false,
            spawns_available: 1,
            player_id: 0,
            show_name_tags: true,
            show_player_markers: 1,
            world_time: 12,
            weather: 10,
            gravity: 0.008,
            lan_mode: false,
            death_drop_money: 0,
            instagib: false,
            on_foot_rate: 40,
            in_car_rate: 40,
            weapon_rate: 40,
            multiplier: 10,
            lag_compensation: 1,
            hostname: String::new(),
            vehicle_friendly_fire: false,
            use_player_ped_anims: false,
            world_bounds: [-20000.0, -20000.0, 20000.0, 20000.0],
            game_mode_text: String::new(),
            map_name: String::new(),
        }
    }
}

pub fn init_game(params: &InitGameParams) -> Vec<u8> {
    let mut bs = BitStream::new();
    bs.write_u8(RPC_INIT_GAME);
    write_bool(&mut bs, params.zone_names);
    write_bool(&mut bs, params.use_cj_walk);
    write_bool(&mut bs, params.allow_weapons);
    write_bool(&mut bs, params.limit_global_chat_radius);
    bs.write_f32_le(params.global_chat_radius);
    write_bool(&mut bs, params.stunt_bonus);
    bs.write_f32_le(params.name_tag_draw_distance);
    write_bool(&mut bs, params.disable_enter_exits);
    write_bool(&mut bs, params.name_tag_los);
    write_bool(&mut bs, params.manual_vehicle_engine_and_lights);
    bs.write_u32_le(params.spawns_available);
    bs.write_u16_le(params.player_id);
    write_bool(&mut bs, params.show_name_tags);
    bs.write_u32_le(params.show_player_markers);
    bs.write_u8(params.world_time);
    bs.write_u8(params.weather);
    bs.write_f32_le(params.gravity);
    write_bool(&mut bs, params.lan_mode);
    bs.write_u32_le(params.death_drop_money as u32);
    write_bool(&mut bs, params.instagib);
    bs.write_u32_le(params.on_foot_rate);
    bs.write_u32_le(params.in_car_rate);
    bs.write_u32_le(params.weapon_rate);
    bs.write_u32_le(params.multiplier);
    bs.write_u32_le(params.lag_compensation);
    write_rpc_string(&mut bs, &params.hostname);
    write_bool(&mut bs, params.vehicle_friendly_fire);
    write_bool(&mut bs, params.use_player_ped_anims);
    for bound in params.world_bounds {
        bs.write_f32_le(bound);
    }
    write_rpc_string(&mut bs, &params.game_mode_text);
    write_rpc_string(&mut bs, &params.map_name);
    bs.into_inner()
}

/// Spawn class for a player. The team field is a single byte.
#[derive(Debug, Clone, Copy)]
pub struct SpawnInfo {
    pub team: u8,
    pub skin: i32,
    pub position: [f32; 3],
    pub rotation: f32,
    pub weapons: [(i32, i32); 3],
}

pub fn set_spawn_info(info: &SpawnInfo) -> Vec<u8> {
    let mut bs = BitStream::new();
    bs.write_u8(RPC_SET_SPAWN_INFO);
    bs.write_u8(info.team);
    bs.write_u32_le(info.skin as u32);
    for coord in info.position {
        bs.write_f32_le(coord);
    }
    bs.write_f32_le(info.rotation);
    for (weapon, ammo) in info.weapons {
        bs.write_u32_le(weapon as u32);
        bs.write_u32_le(ammo as u32);
    }
    bs.into_inner()
}

pub fn spawn_player() -> Vec<u8> {
    vec![RPC_SPAWN_PLAYER]
}

pub fn set_game_mode_text(text: &str) -> Vec<u8> {
    let mut bs = BitStream::new();
    bs.write_u8(RPC_SET_GAME_MODE_TEXT);
    write_rpc_string(&mut bs, text);
    bs.into_inner()
}

pub fn set_weather(weather: u8) -> Vec<u8> {
    vec![RPC_SET_WEATHER, weather]
}

pub fn set_world_time(hour: u8) -> Vec<u8> {
    vec![RPC_SET_WORLD_TIME, hour]
}

pub fn set_gravity(gravity: f32) -> Vec<u8> {
    let mut bs = BitStream::new();
    bs.write_u8(RPC_SET_GRAVITY);
    bs.write_f32_le(gravity);
    bs.into_inner()
}

pub fn toggle_player_controllable(controllable: bool) -> Vec<u8> {
    vec![RPC_TOGGLE_PLAYER_CONTROLLABLE, u8::from(controllable)]
}

pub fn set_player_pos(position: [f32; 3]) -> Vec<u8> {
    let mut bs = BitStream::new();
    bs.write_u8(RPC_SET_PLAYER_POS);
    for coord in position {
        bs.write_f32_le(coord);
    }
    bs.into_inner()
}

pub fn set_player_facing_angle(angle: f32) -> Vec<u8> {
    let mut bs = BitStream::new();
    bs.write_u8(RPC_SET_PLAYER_FACING_ANGLE);
    bs.write_f32_le(angle);
    bs.into_inner()
}
