use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::common::error::ImportError;

/// Canonical shipment fields a source column can be mapped onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalField {
    // Required
    TrackingCode,
    CustomerName,
    CustomerEmail,

    // Customer
    CustomerPhone,
    CustomerDocument,

    // Order
    OrderNumber,
    InvoiceNumber,
    Marketplace,
    Carrier,
    ServiceType,
    ShipmentStatus,
    ShippingDate,
    EstimatedDelivery,
    DeliveredAt,

    // Origin
    OriginCity,
    OriginState,
    OriginPostalCode,

    // Destination
    DestinationStreet,
    DestinationNumber,
    DestinationComplement,
    DestinationNeighborhood,
    DestinationCity,
    DestinationState,
    DestinationPostalCode,

    // Package
    ProductName,
    ProductSku,
    Quantity,
    WeightKg,
    HeightCm,
    WidthCm,
    LengthCm,
    DeclaredValue,
    ShippingCost,
    Notes,
}

/// Value shape a field is expected to carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldFormat {
    TrackingCode,
    Email,
    TaxId,
    PostalCode,
    Date,
    Currency,
    Phone,
    Number,
    Text,
}

impl CanonicalField {
    pub const ALL: [CanonicalField; 34] = [
        CanonicalField::TrackingCode,
        CanonicalField::CustomerName,
        CanonicalField::CustomerEmail,
        CanonicalField::CustomerPhone,
        CanonicalField::CustomerDocument,
        CanonicalField::OrderNumber,
        CanonicalField::InvoiceNumber,
        CanonicalField::Marketplace,
        CanonicalField::Carrier,
        CanonicalField::ServiceType,
        CanonicalField::ShipmentStatus,
        CanonicalField::ShippingDate,
        CanonicalField::EstimatedDelivery,
        CanonicalField::DeliveredAt,
        CanonicalField::OriginCity,
        CanonicalField::OriginState,
        CanonicalField::OriginPostalCode,
        CanonicalField::DestinationStreet,
        CanonicalField::DestinationNumber,
        CanonicalField::DestinationComplement,
        CanonicalField::DestinationNeighborhood,
        CanonicalField::DestinationCity,
        CanonicalField::DestinationState,
        CanonicalField::DestinationPostalCode,
        CanonicalField::ProductName,
        CanonicalField::ProductSku,
        CanonicalField::Quantity,
        CanonicalField::WeightKg,
        CanonicalField::HeightCm,
        CanonicalField::WidthCm,
        CanonicalField::LengthCm,
        CanonicalField::DeclaredValue,
        CanonicalField::ShippingCost,
        CanonicalField::Notes,
    ];

    pub const REQUIRED: [CanonicalField; 3] = [
        CanonicalField::TrackingCode,
        CanonicalField::CustomerName,
        CanonicalField::CustomerEmail,
    ];

    pub fn is_required(&self) -> bool {
        Self::REQUIRED.contains(self)
    }

    /// Stable snake_case key used in templates, rule sets and reports.
    pub fn key(&self) -> &'static str {
        match self {
            CanonicalField::TrackingCode => "tracking_code",
            CanonicalField::CustomerName => "customer_name",
            CanonicalField::CustomerEmail => "customer_email",
            CanonicalField::CustomerPhone => "customer_phone",
            CanonicalField::CustomerDocument => "customer_document",
            CanonicalField::OrderNumber => "order_number",
            CanonicalField::InvoiceNumber => "invoice_number",
            CanonicalField::Marketplace => "marketplace",
            CanonicalField::Carrier => "carrier",
            CanonicalField::ServiceType => "service_type",
            CanonicalField::ShipmentStatus => "shipment_status",
            CanonicalField::ShippingDate => "shipping_date",
            CanonicalField::EstimatedDelivery => "estimated_delivery",
            CanonicalField::DeliveredAt => "delivered_at",
            CanonicalField::OriginCity => "origin_city",
            CanonicalField::OriginState => "origin_state",
            CanonicalField::OriginPostalCode => "origin_postal_code",
            CanonicalField::DestinationStreet => "destination_street",
            CanonicalField::DestinationNumber => "destination_number",
            CanonicalField::DestinationComplement => "destination_complement",
            CanonicalField::DestinationNeighborhood => "destination_neighborhood",
            CanonicalField::DestinationCity => "destination_city",
            CanonicalField::DestinationState => "destination_state",
            CanonicalField::DestinationPostalCode => "destination_postal_code",
            CanonicalField::ProductName => "product_name",
            CanonicalField::ProductSku => "product_sku",
            CanonicalField::Quantity => "quantity",
            CanonicalField::WeightKg => "weight_kg",
            CanonicalField::HeightCm => "height_cm",
            CanonicalField::WidthCm => "width_cm",
            CanonicalField::LengthCm => "length_cm",
            CanonicalField::DeclaredValue => "declared_value",
            CanonicalField::ShippingCost => "shipping_cost",
            CanonicalField::Notes => "notes",
        }
    }

    /// Human label shown in alerts.
    pub fn label(&self) -> &'static str {
        match self {
            CanonicalField::TrackingCode => "Tracking code",
            CanonicalField::CustomerName => "Customer name",
            CanonicalField::CustomerEmail => "Customer email",
            CanonicalField::CustomerPhone => "Customer phone",
            CanonicalField::CustomerDocument => "Customer document",
            CanonicalField::OrderNumber => "Order number",
            CanonicalField::InvoiceNumber => "Invoice number",
            CanonicalField::Marketplace => "Marketplace",
            CanonicalField::Carrier => "Carrier",
            CanonicalField::ServiceType => "Service type",
            CanonicalField::ShipmentStatus => "Shipment status",
            CanonicalField::ShippingDate => "Shipping date",
            CanonicalField::EstimatedDelivery => "Estimated delivery",
            CanonicalField::DeliveredAt => "Delivered at",
            CanonicalField::OriginCity => "Origin city",
            CanonicalField::OriginState => "Origin state",
            CanonicalField::OriginPostalCode => "Origin postal code",
            CanonicalField::DestinationStreet => "Destination street",
            CanonicalField::DestinationNumber => "Destination number",
            CanonicalField::DestinationComplement => "Destination complement",
            CanonicalField::DestinationNeighborhood => "Destination neighborhood",
            CanonicalField::DestinationCity => "Destination city",
            CanonicalField::DestinationState => "Destination state",
            CanonicalField::DestinationPostalCode => "Destination postal code",
            CanonicalField::ProductName => "Product name",
            CanonicalField::ProductSku => "Product SKU",
            CanonicalField::Quantity => "Quantity",
            CanonicalField::WeightKg => "Weight (kg)",
            CanonicalField::HeightCm => "Height (cm)",
            CanonicalField::WidthCm => "Width (cm)",
            CanonicalField::LengthCm => "Length (cm)",
            CanonicalField::DeclaredValue => "Declared value",
            CanonicalField::ShippingCost => "Shipping cost",
            CanonicalField::Notes => "Notes",
        }
    }

    pub fn format(&self) -> FieldFormat {
        match self {
            CanonicalField::TrackingCode => FieldFormat::TrackingCode,
            CanonicalField::CustomerEmail => FieldFormat::Email,
            CanonicalField::CustomerPhone => FieldFormat::Phone,
            CanonicalField::CustomerDocument => FieldFormat::TaxId,
            CanonicalField::OriginPostalCode | CanonicalField::DestinationPostalCode => {
                FieldFormat::PostalCode
            }
            CanonicalField::ShippingDate
            | CanonicalField::EstimatedDelivery
            | CanonicalField::DeliveredAt => FieldFormat::Date,
            CanonicalField::DeclaredValue | CanonicalField::ShippingCost => FieldFormat::Currency,
            CanonicalField::Quantity
            | CanonicalField::WeightKg
            | CanonicalField::HeightCm
            | CanonicalField::WidthCm
            | CanonicalField::LengthCm => FieldFormat::Number,
            _ => FieldFormat::Text,
        }
    }

    /// Alternative header spellings seen in marketplace and carrier exports.
    pub fn aliases(&self) -> &'static [&'static str] {
        match self {
            CanonicalField::TrackingCode => &["tracking", "codigo rastreio", "rastreio", "objeto", "awb"],
            CanonicalField::CustomerName => &["name", "nome", "cliente", "destinatario", "recipient"],
            CanonicalField::CustomerEmail => &["email", "e-mail", "mail"],
            CanonicalField::CustomerPhone => &["phone", "telefone", "celular", "mobile"],
            CanonicalField::CustomerDocument => &["cpf", "cnpj", "documento", "tax id"],
            CanonicalField::OrderNumber => &["order", "pedido", "order id", "numero pedido"],
            CanonicalField::InvoiceNumber => &["nota fiscal", "nf", "invoice"],
            CanonicalField::Marketplace => &["canal", "channel", "loja"],
            CanonicalField::Carrier => &["transportadora", "shipping company", "carrier code"],
            CanonicalField::ServiceType => &["servico", "service", "modalidade"],
            CanonicalField::ShipmentStatus => &["status", "situacao"],
            CanonicalField::ShippingDate => &["data envio", "ship date", "postagem", "dispatch date"],
            CanonicalField::EstimatedDelivery => &["previsao entrega", "eta", "due date"],
            CanonicalField::DeliveredAt => &["data entrega", "delivery date"],
            CanonicalField::OriginCity => &["cidade origem", "from city"],
            CanonicalField::OriginState => &["uf origem", "from state"],
            CanonicalField::OriginPostalCode => &["cep origem", "from zip"],
            CanonicalField::DestinationStreet => &["endereco", "logradouro", "address", "street"],
            CanonicalField::DestinationNumber => &["numero", "number"],
            CanonicalField::DestinationComplement => &["complemento", "complement"],
            CanonicalField::DestinationNeighborhood => &["bairro", "neighborhood", "district"],
            CanonicalField::DestinationCity => &["cidade", "city", "municipio"],
            CanonicalField::DestinationState => &["uf", "estado", "state"],
            CanonicalField::DestinationPostalCode => &["cep", "zip", "postal code", "zipcode"],
            CanonicalField::ProductName => &["produto", "product", "item", "descricao"],
            CanonicalField::ProductSku => &["sku", "codigo produto"],
            CanonicalField::Quantity => &["quantidade", "qty", "qtd"],
            CanonicalField::WeightKg => &["peso", "weight"],
            CanonicalField::HeightCm => &["altura", "height"],
            CanonicalField::WidthCm => &["largura", "width"],
            CanonicalField::LengthCm => &["comprimento", "length"],
            CanonicalField::DeclaredValue => &["valor declarado", "valor", "value", "amount"],
            CanonicalField::ShippingCost => &["frete", "freight", "shipping"],
            CanonicalField::Notes => &["observacoes", "obs", "comments"],
        }
    }
}

impl fmt::Display for CanonicalField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

impl FromStr for CanonicalField {
    type Err = ImportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_lowercase();
        CanonicalField::ALL
            .iter()
            .copied()
            .find(|field| field.key() == needle)
            .ok_or_else(|| ImportError::UnknownField(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_round_trip_through_from_str() {
        for field in CanonicalField::ALL {
            assert_eq!(field.key().parse::<CanonicalField>().unwrap(), field);
        }
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        assert!("shoe_size".parse::<CanonicalField>().is_err());
    }

    #[test]
    fn test_required_fields() {
        assert!(CanonicalField::CustomerEmail.is_required());
        assert!(!CanonicalField::CustomerPhone.is_required());
        assert_eq!(CanonicalField::ALL.len() - CanonicalField::REQUIRED.len(), 31);
    }
}
