use heck::ToShoutySnakeCase;
use proc_macro2::{Ident, Span, TokenStream};
use quote::quote;
use syn::spanned::Spanned;
use syn::{parse2, parse_quote, Attribute, DeriveInput, Error, Expr, LitStr, Result};

use crate::add_trait_bounds;

pub(super) fn derive_packet(item: TokenStream) -> Result<TokenStream> {
    let mut input = parse2::<DeriveInput>(item)?;

    let packet_attr = parse_packet_helper_attr(&input.attrs)?.unwrap_or(PacketAttr {
        span: Span::call_site(),
        id: None,
        name: None,
    });

    let type_name = input.ident.clone();

    let name_str = if let Some(attr_name) = packet_attr.name {
        attr_name.value()
    } else {
        type_name.to_string()
    };

    // With no explicit `id = ...` the id constant is looked up in the
    // `packet_id` module under the shouty name of the packet.
    let packet_id: Expr = match packet_attr.id {
        Some(expr) => expr,
        None => match syn::parse_str::<Ident>(&name_str.to_shouty_snake_case()) {
            Ok(ident) => parse_quote!(::veldt_protocol::packet_id::#ident),
            Err(_) => {
                return Err(Error::new(
                    packet_attr.span,
                    "missing valid `id = ...` value from `packet` helper attribute",
                ))
            }
        },
    };

    add_trait_bounds(&mut input.generics, quote!(::std::fmt::Debug));

    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    Ok(quote! {
        impl #impl_generics ::veldt_protocol::__private::Packet for #type_name #ty_generics
        #where_clause
        {
            const ID: u16 = #packet_id;
            const NAME: &'static str = #name_str;
        }
    })
}

struct PacketAttr {
    span: Span,
    id: Option<Expr>,
    name: Option<LitStr>,
}

fn parse_packet_helper_attr(attrs: &[Attribute]) -> Result<Option<PacketAttr>> {
    for attr in attrs {
        if attr.path().is_ident("packet") {
            let mut res = PacketAttr {
                span: attr.span(),
                id: None,
                name: None,
            };

            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("id") {
                    res.id = Some(meta.value()?.parse::<Expr>()?);
                    Ok(())
                } else if meta.path.is_ident("name") {
                    res.name = Some(meta.value()?.parse::<LitStr>()?);
                    Ok(())
                } else {
                    Err(meta.error("unrecognized #[packet(...)] argument"))
                }
            })?;

            return Ok(Some(res));
        }
    }

    Ok(None)
}
