use tracing::instrument;

use crate::models::{CartLine, ResolvedLine};
use crate::settlement::errors::SettlementFailure;
use crate::settlement::gateways::CatalogGateway;

/// Resolves every cart line against the catalog. Any unknown or inactive
/// variant fails the whole cart.
#[instrument(skip(catalog, lines), fields(line_count = lines.len()))]
pub async fn resolve_lines(
    catalog: &dyn CatalogGateway,
    lines: &[CartLine],
) -> Result<Vec<ResolvedLine>, SettlementFailure> {
    let mut resolved = Vec::with_capacity(lines.len());

    for line in lines {
        let variant = catalog
            .get_variant(line.variant_id)
            .await?
            .filter(|variant| variant.is_active)
            .ok_or_else(|| {
                SettlementFailure::NotFound(format!(
                    "Product variant {} not found",
                    line.variant_id
                ))
            })?;

        resolved.push(ResolvedLine {
            variant_id: variant.variant_id,
            brand_id: variant.brand_id,
            product_name: variant.product_name,
            price: variant.price,
            quantity: line.quantity,
        });
    }

    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Variant;
    use async_trait::async_trait;
    use service_core::error::AppError;
    use std::collections::HashMap;
    use uuid::Uuid;

    struct StaticCatalog(HashMap<Uuid, Variant>);

    #[async_trait]
    impl CatalogGateway for StaticCatalog {
        async fn get_variant(&self, variant_id: Uuid) -> Result<Option<Variant>, AppError> {
            Ok(self.0.get(&variant_id).cloned())
        }
    }

    fn variant(price: i64, is_active: bool) -> Variant {
        Variant {
            variant_id: Uuid::new_v4(),
            product_id: Uuid::new_v4(),
            brand_id: Uuid::new_v4(),
            product_name: "Linen shirt".to_string(),
            price,
            stock: 10,
            is_active,
        }
    }

    #[tokio::test]
    async fn resolves_price_and_brand_snapshot() {
        let v = variant(1500, true);
        let catalog = StaticCatalog(HashMap::from([(v.variant_id, v.clone())]));

        let lines = [CartLine {
            variant_id: v.variant_id,
            quantity: 3,
        }];
        let resolved = resolve_lines(&catalog, &lines).await.unwrap();

        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].brand_id, v.brand_id);
        assert_eq!(resolved[0].total(), Some(4500));
    }

    #[tokio::test]
    async fn one_unknown_variant_fails_the_cart() {
        let v = variant(1500, true);
        let catalog = StaticCatalog(HashMap::from([(v.variant_id, v.clone())]));

        let lines = [
            CartLine {
                variant_id: v.variant_id,
                quantity: 1,
            },
            CartLine {
                variant_id: Uuid::new_v4(),
                quantity: 1,
            },
        ];
        let err = resolve_lines(&catalog, &lines).await.unwrap_err();
        assert!(matches!(err, SettlementFailure::NotFound(_)));
    }

    #[tokio::test]
    async fn inactive_variant_is_not_found() {
        let v = variant(1500, false);
        let catalog = StaticCatalog(HashMap::from([(v.variant_id, v.clone())]));

        let lines = [CartLine {
            variant_id: v.variant_id,
            quantity: 1,
        }];
        let err = resolve_lines(&catalog, &lines).await.unwrap_err();
        assert!(matches!(err, SettlementFailure::NotFound(_)));
    }
}
