#[allow(clippy::too_many_arguments)]
pub mod protocol {
    alloy::sol! {
        /// Streaming trade protocol core contract, reduced to the events and
        /// calls the keeper consumes.
        #[derive(Debug)]
        #[sol(rpc)]
        interface StreamCore {
            event TradeCreated(
                uint256 indexed tradeId,
                address indexed user,
                address tokenIn,
                address tokenOut,
                uint256 amountIn,
                uint256 amountRemaining,
                uint256 minAmountOut,
                uint256 realisedAmountOut,
                uint256 lastSweetSpot,
                bool isInstasettlable
            );

            event TradeStreamExecuted(
                uint256 indexed tradeId,
                uint256 amountIn,
                uint256 realisedAmountOut,
                uint256 lastSweetSpot
            );

            event TradeCancelled(
                uint256 indexed tradeId,
                uint256 amountRemaining,
                uint256 realisedAmountOut
            );

            event TradeSettled(
                uint256 indexed tradeId,
                address indexed settler,
                uint256 totalAmountIn,
                uint256 totalAmountOut,
                uint256 totalFees
            );

            function outstandingTradeIds(bytes32 pairId) external view returns (uint256[] memory);

            function executeTrades(bytes32 pairId) external;
        }
    }
}
