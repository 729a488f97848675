//! On-chain ABI bindings via `alloy_sol_types::sol!`. Grounded on
//! `examples/x402-rs-x402-rs/src/facilitator_local.rs` (inline `sol!` usage
//! pattern) and
//! `.../v2_eip155_exact/facilitator/permit2.rs` (Permit2 struct bindings).

use alloy_sol_types::sol;

sol! {
    #[sol(rpc)]
    interface IERC20 {
        function balanceOf(address owner) external view returns (uint256);
        function allowance(address owner, address spender) external view returns (uint256);
        function transfer(address to, uint256 amount) external returns (bool);
    }
}

sol! {
    #[sol(rpc)]
    interface IEIP3009Token {
        function transferWithAuthorization(
            address from,
            address to,
            uint256 value,
            uint256 validAfter,
            uint256 validBefore,
            bytes32 nonce,
            uint8 v,
            bytes32 r,
            bytes32 s
        ) external;
        function version() external view returns (string memory);
        function name() external view returns (string memory);
    }
}

// EIP-712 struct used to reconstruct the ERC-3009 signing hash.
sol! {
    struct TransferWithAuthorization {
        address from;
        address to;
        uint256 value;
        uint256 validAfter;
        uint256 validBefore;
        bytes32 nonce;
    }
}

// Permit2's witness-spend surface (§4.2). `permitWitnessTransferFrom` pulls
// `permitted.amount` from `permitted.token` and forwards it, verifying the
// signature over the attached witness.
sol! {
    struct TokenPermissions {
        address token;
        uint256 amount;
    }

    struct PermitTransferFrom {
        TokenPermissions permitted;
        uint256 nonce;
        uint256 deadline;
    }

    struct SignatureTransferDetails {
        address to;
        uint256 requestedAmount;
    }

    #[sol(rpc)]
    interface IPermit2 {
        function permitWitnessTransferFrom(
            PermitTransferFrom permit,
            SignatureTransferDetails transferDetails,
            address owner,
            bytes32 witness,
            string calldata witnessTypeString,
            bytes calldata signature
        ) external;
        function nonceBitmap(address owner, uint256 wordPos) external view returns (uint256);
    }

    struct PermitWitnessTransferFrom {
        TokenPermissions permitted;
        address spender;
        uint256 nonce;
        uint256 deadline;
        X402TransferDetails witness;
    }

    struct X402TransferDetails {
        address receiver;
        uint256 validAfter;
        uint256 validBefore;
    }
}

/// The well-known canonical Permit2 deployment address, identical across
/// every chain it's deployed on.
pub const PERMIT2_ADDRESS: alloy_primitives::Address =
    alloy_primitives::address!("000000000022D473030F116dDEE9F6B43aC78BA");

sol! {
    #[sol(rpc)]
    interface IFeeSplitter {
        function splitPayment(address token, address payer, address recipient, uint256 amount)
            external
            returns (uint256 net, uint256 fee);
    }
}
