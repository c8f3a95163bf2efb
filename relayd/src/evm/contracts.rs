use ethers_contract::abigen;

// Bindings for the two destination contracts the relayer calls.
abigen!(
    MessageTransmitter,
    r#"[
        function receiveMessage(bytes message, bytes attestation) external returns (bool)
    ]"#
);

abigen!(
    TicketHook,
    r#"[
        function processAfterMint(address buyer, uint256 tokenId, uint256 qty, string memo) external returns (bool)
        function price6(uint256 tokenId) external view returns (uint256)
    ]"#
);
