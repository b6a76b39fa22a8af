use alloy::primitives::{Address, U256};

// ERC-20 function selectors
pub const BALANCE_OF_SELECTOR: [u8; 4] = [0x70, 0xa0, 0x82, 0x31]; // balanceOf(address)
pub const DECIMALS_SELECTOR: [u8; 4] = [0x31, 0x3c, 0xe5, 0x67]; // decimals()
pub const DEPOSIT_SELECTOR: [u8; 4] = [0xd0, 0xe3, 0x0d, 0xb0]; // deposit() - WETH wrap

/// 주소를 32바이트로 좌측 패딩
pub fn encode_address(address: Address) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(address.as_slice());
    word
}

/// balanceOf(address) calldata
pub fn encode_balance_of(account: Address) -> Vec<u8> {
    let mut data = Vec::with_capacity(36);
    data.extend_from_slice(&BALANCE_OF_SELECTOR);
    data.extend_from_slice(&encode_address(account));
    data
}

/// decimals() calldata
pub fn encode_decimals() -> Vec<u8> {
    DECIMALS_SELECTOR.to_vec()
}

/// deposit() calldata (wrap 스텝용, value로 네이티브를 전달)
pub fn encode_deposit() -> Vec<u8> {
    DEPOSIT_SELECTOR.to_vec()
}

/// 32바이트 반환값을 U256으로 해석
pub fn decode_u256(ret: &[u8]) -> Option<U256> {
    if ret.len() < 32 {
        return None;
    }
    Some(U256::from_be_slice(&ret[..32]))
}

/// 32바이트 반환값의 마지막 바이트를 u8로 해석 (decimals용)
pub fn decode_u8(ret: &[u8]) -> Option<u8> {
    if ret.len() < 32 {
        return None;
    }
    Some(ret[31])
}
