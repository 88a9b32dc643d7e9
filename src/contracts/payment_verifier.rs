use ethers::prelude::*;

// Verifier contract holding the durable used-proof set and per-signer nonces
abigen!(
    PaymentVerifier,
    r#"[
        function verifyPaymentProof(bytes32 txHash, address token, address recipient, uint256 amount, uint256 timestamp, uint256 nonce, bytes signature) external view returns (bool)
        function markProofUsed(bytes32 txHash, address token, address recipient, uint256 amount, uint256 timestamp, uint256 nonce, bytes signature) external
        function getNonce(address user) external view returns (uint256)
        function isProofUsed(bytes32 proofHash) external view returns (bool)
    ]"#
);
