//! 阀门锁定掩码 (VentilSperre) 编解码
//!
//! 16个阀门对应一个 u16：第 i 位（从0开始）对应阀门 i+1，
//! **置位表示该阀门被禁用**。编码与解码在两个方向上互为精确逆运算。

use crate::models::structs::ValveConfig;
use crate::utils::config::VALVES_PER_BLOCK;

/// 启用状态数组 → 锁定掩码
///
/// `enabled[i] == false` 时置位第 i 位。
pub fn encode_valve_sperre(enabled: &[bool; 16]) -> u16 {
    let mut mask = 0u16;
    for (i, on) in enabled.iter().enumerate() {
        if !on {
            mask |= 1 << i;
        }
    }
    mask
}

/// 锁定掩码 → 启用状态数组
pub fn decode_valve_sperre(mask: u16) -> [bool; 16] {
    let mut enabled = [false; 16];
    for (i, slot) in enabled.iter_mut().enumerate() {
        *slot = mask & (1 << i) == 0;
    }
    enabled
}

/// 由阀门配置计算锁定掩码，未出现在配置中的阀门视为禁用
pub fn valve_sperre_from_configs(configs: &[ValveConfig]) -> u16 {
    let mut enabled = [false; VALVES_PER_BLOCK as usize];
    for config in configs {
        if (1..=VALVES_PER_BLOCK).contains(&config.valve_number) {
            enabled[usize::from(config.valve_number - 1)] = config.enabled;
        }
    }
    encode_valve_sperre(&enabled)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_enabled_is_zero_mask() {
        assert_eq!(encode_valve_sperre(&[true; 16]), 0x0000);
        assert_eq!(encode_valve_sperre(&[false; 16]), 0xFFFF);
    }

    #[test]
    fn test_bit_position_matches_valve_number() {
        let mut enabled = [true; 16];
        enabled[0] = false; // 阀门1
        enabled[15] = false; // 阀门16
        assert_eq!(encode_valve_sperre(&enabled), 0b1000_0000_0000_0001);
    }

    #[test]
    fn test_encode_decode_is_exact_inverse_for_every_mask() {
        for mask in 0..=u16::MAX {
            assert_eq!(encode_valve_sperre(&decode_valve_sperre(mask)), mask);
        }
    }

    #[test]
    fn test_decode_encode_is_exact_inverse_for_every_valve_array() {
        // 每个 16 位布尔数组恰好对应一个掩码，遍历掩码即遍历全部数组
        for mask in 0..=u16::MAX {
            let enabled = decode_valve_sperre(mask);
            assert_eq!(decode_valve_sperre(encode_valve_sperre(&enabled)), enabled);
        }
    }

    #[test]
    fn test_mask_from_configs_treats_missing_valves_as_disabled() {
        let configs = vec![ValveConfig::new(1, true), ValveConfig::new(2, false), ValveConfig::new(3, true)];
        let mask = valve_sperre_from_configs(&configs);
        assert_eq!(mask & 0b111, 0b010);
        assert_eq!(mask >> 3, 0xFFFF >> 3);
    }
}
