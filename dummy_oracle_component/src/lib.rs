//! # Dummy Oracle Blueprint
//! Component for testing price lookups without external dependencies.

use scrypto::prelude::*;

#[blueprint]
mod oracle {
    enable_method_auth! {
        methods {
            get_price => PUBLIC;
            set_price => restrict_to: [OWNER];
        }
    }

    struct Oracle {
        prices: HashMap<String, Decimal>,
    }

    impl Oracle {
        pub fn instantiate_oracle() -> Global<Oracle> {
            let mut prices: HashMap<String, Decimal> = HashMap::new();

            // Add default XRD price
            prices.insert("XRD".to_string(), dec!(1));

            Self { prices }
                .instantiate()
                .prepare_to_globalize(OwnerRole::None)
                .metadata(metadata! {
                    init {
                        "name" => "Girder Dummy Oracle".to_string(), updatable;
                        "description" => "A dummy oracle used for testing Girder".to_string(), updatable;
                        "info_url" => Url::of("https://girder.finance"), updatable;
                    }
                })
                .globalize()
        }

        pub fn get_price(&self, market_id: String) -> Decimal {
            assert!(
                self.prices.get(&market_id).is_some(),
                "No price found for market {}",
                market_id
            );

            self.prices.get(&market_id).cloned().unwrap()
        }

        pub fn set_price(&mut self, market_id: String, price: Decimal) {
            self.prices.insert(market_id, price);
        }
    }
}
