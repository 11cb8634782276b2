//! All of veldt's network packets.
//!
//! Packets are grouped in submodules according to the link they travel on.
//! Client-facing packets use the `C2s`/`S2c` suffix convention; S2S packets
//! are named from the sending and receiving process.

pub mod game;
pub mod gateway;
pub mod login;
pub mod world;

#[cfg(test)]
mod tests {
    use crate::dispatcher::MAX_HANDLER_ID;
    use crate::packet_id::*;

    #[test]
    fn packet_ids_are_unique_and_in_range() {
        let ids = [
            LOGIN_REQ_C2S,
            LOGIN_RES_S2C,
            WORLD_SELECT_REQ_C2S,
            WORLD_SELECT_RES_S2C,
            LOGIN_WORLD_SELECT_REQ,
            WORLD_LOGIN_SELECT_RES,
            CONNECT_REQ_C2S,
            CONNECT_RES_S2C,
            CHAT_REQ_C2S,
            CHAT_RES_S2C,
            MOVE_REQ_C2S,
            MOVE_RES_S2C,
            ATTACK_RES_S2C,
            GATEWAY_GAME_MOVE_REQ,
            GATEWAY_GAME_LEAVE_REQ,
            GAME_GATEWAY_MOVE_RES,
            GAME_GATEWAY_ATTACK_RES,
        ];

        for (i, a) in ids.iter().enumerate() {
            assert!(*a < MAX_HANDLER_ID);

            for b in &ids[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }
}
