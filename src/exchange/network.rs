/// Maps exchange-specific chain labels onto one canonical id so the same
/// chain compares equal across exchanges.
pub fn canonical_network(raw: &str) -> String {
    let upper = raw.trim().to_uppercase();
    let canonical = match upper.as_str() {
        "TRX" | "TRON" | "TRC20" => "TRC20",
        "ETH" | "ERC20" | "ETHEREUM" => "ERC20",
        "BSC" | "BEP20" | "BEP20(BSC)" | "BNB SMART CHAIN" => "BEP20",
        "MATIC" | "POLYGON" | "POL" => "POLYGON",
        "ARB" | "ARBITRUM" | "ARBITRUM ONE" | "ARBONE" => "ARBITRUM",
        "OP" | "OPTIMISM" | "OPETH" => "OPTIMISM",
        "AVAXC" | "AVAX C-CHAIN" | "AVAX_C" => "AVAXC",
        "SOL" | "SOLANA" | "SPL" => "SOL",
        other => other,
    };
    canonical.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aliases_collapse() {
        assert_eq!(canonical_network("TRX"), "TRC20");
        assert_eq!(canonical_network("trc20"), "TRC20");
        assert_eq!(canonical_network("ETH"), "ERC20");
        assert_eq!(canonical_network("BSC"), "BEP20");
        assert_eq!(canonical_network(" matic "), "POLYGON");
    }

    #[test]
    fn test_unknown_network_uppercased() {
        assert_eq!(canonical_network("kcc"), "KCC");
        assert_eq!(canonical_network("BTC"), "BTC");
    }
}
