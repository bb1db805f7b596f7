use proc_macro::TokenStream;
use quote::{format_ident, quote};
use syn::ext::IdentExt;
use syn::{
    parse_macro_input, spanned::Spanned, Attribute, Data, DeriveInput, Fields, Ident, Path, Type,
};

#[proc_macro_derive(NestedSetModel, attributes(nested_set))]
pub fn derive_nested_set_model(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    match impl_nested_set_model(&input) {
        Ok(tokens) => tokens,
        Err(err) => err.to_compile_error().into(),
    }
}

#[derive(Default)]
struct Options {
    id_field: Option<String>,
    id_type: Option<Type>,
    structure_field: Option<String>,
    element_field: Option<String>,
    root_field: Option<String>,
    left_field: Option<String>,
    right_field: Option<String>,
    level_field: Option<String>,
    structure_module: Option<Path>,
    structure_id_field: Option<String>,
    max_levels_field: Option<String>,
    table_name: Option<String>,
    entity_name: Option<String>,
    lock_namespace: Option<String>,
    advisory_locks: Option<bool>,
    lock_timeout_ms: Option<u64>,
}

fn impl_nested_set_model(input: &DeriveInput) -> syn::Result<TokenStream> {
    let struct_ident = &input.ident;

    let data_struct = match &input.data {
        Data::Struct(data) => data,
        _ => {
            return Err(syn::Error::new(
                input.span(),
                "NestedSetModel can only be derived for structs",
            ))
        }
    };

    let mut options = Options::default();
    let mut table_name: Option<String> = None;

    for attr in &input.attrs {
        if attr.path().is_ident("nested_set") {
            parse_nested_set_attr(attr, &mut options)?;
        }

        if attr.path().is_ident("sea_orm") {
            if let Some(name) = parse_sea_orm_table_name(attr)? {
                table_name = Some(name);
            }
        }
    }

    let field = |value: Option<String>, default: &str| value.unwrap_or_else(|| default.to_string());
    let id_field_name = field(options.id_field, "id");
    let structure_field_name = field(options.structure_field, "structure_id");
    let element_field_name = field(options.element_field, "element_id");
    let root_field_name = field(options.root_field, "root");
    let left_field_name = field(options.left_field, "lft");
    let right_field_name = field(options.right_field, "rgt");
    let level_field_name = field(options.level_field, "level");
    let structure_id_field_name = field(options.structure_id_field, "id");
    let max_levels_field_name = field(options.max_levels_field, "max_levels");

    let ident = |name: &str| Ident::new(name, struct_ident.span());
    let id_field_ident = ident(&id_field_name);
    let structure_field_ident = ident(&structure_field_name);
    let element_field_ident = ident(&element_field_name);
    let root_field_ident = ident(&root_field_name);
    let left_field_ident = ident(&left_field_name);
    let right_field_ident = ident(&right_field_name);
    let level_field_ident = ident(&level_field_name);
    let structure_id_field_ident = ident(&structure_id_field_name);
    let max_levels_field_ident = ident(&max_levels_field_name);

    let mut id_field_type: Option<Type> = options.id_type.clone();

    if let Fields::Named(ref fields) = data_struct.fields {
        for field in &fields.named {
            if let Some(ident) = &field.ident {
                if ident == &id_field_ident && id_field_type.is_none() {
                    id_field_type = Some(field.ty.clone());
                }
            }
        }
    } else {
        return Err(syn::Error::new(
            data_struct.fields.span(),
            "NestedSetModel requires named fields",
        ));
    }

    let id_type = id_field_type.ok_or_else(|| {
        syn::Error::new(
            struct_ident.span(),
            "Unable to determine id field type; specify `id_type = ...` in #[nested_set]",
        )
    })?;

    let structure_module_path = options
        .structure_module
        .ok_or_else(|| syn::Error::new(struct_ident.span(), "`structure_module` must be set"))?;

    let entity_name = options
        .entity_name
        .unwrap_or_else(|| struct_ident.unraw().to_string());
    let table_name = options
        .table_name
        .or(table_name)
        .unwrap_or_else(|| struct_ident.unraw().to_string());

    let column = |name: &str| format_ident!("{}", to_pascal_case(name));
    let id_column_variant = column(&id_field_name);
    let structure_column_variant = column(&structure_field_name);
    let element_column_variant = column(&element_field_name);
    let root_column_variant = column(&root_field_name);
    let left_column_variant = column(&left_field_name);
    let right_column_variant = column(&right_field_name);
    let level_column_variant = column(&level_field_name);
    let structure_id_column_variant = column(&structure_id_field_name);

    let entity_name_literal = syn::LitStr::new(&entity_name, struct_ident.span());
    let table_name_literal = syn::LitStr::new(&table_name, struct_ident.span());

    let mut config_options = quote! { ::nested_set::NestedSetOptions::default() };
    if let Some(namespace) = options.lock_namespace {
        let literal = syn::LitStr::new(&namespace, struct_ident.span());
        config_options = quote! { #config_options.lock_namespace(#literal) };
    }
    if let Some(enabled) = options.advisory_locks {
        config_options = quote! { #config_options.advisory_locks(#enabled) };
    }
    if let Some(millis) = options.lock_timeout_ms {
        config_options = quote! { #config_options.lock_timeout_ms(#millis) };
    }

    let generated = quote! {
        impl ::nested_set::NestedSetModel for #struct_ident {
            type Entity = Entity;
            type ActiveModel = ActiveModel;
            type Id = #id_type;

            type StructureEntity = #structure_module_path::Entity;
            type StructureModel = #structure_module_path::Model;
            type StructureActiveModel = #structure_module_path::ActiveModel;

            fn nested_set_config() -> &'static ::nested_set::NestedSetConfig {
                static CONFIG: ::nested_set::__private::Lazy<::nested_set::NestedSetConfig> =
                    ::nested_set::__private::Lazy::new(|| {
                        let base = ::nested_set::NestedSetConfig::new(
                            #entity_name_literal,
                            #table_name_literal,
                        );
                        #config_options.apply(base)
                    });
                &CONFIG
            }

            fn id(&self) -> Self::Id {
                self.#id_field_ident.clone()
            }

            fn structure_id(&self) -> Self::Id {
                self.#structure_field_ident.clone()
            }

            fn element_id(&self) -> Self::Id {
                self.#element_field_ident.clone()
            }

            fn root(&self) -> ::core::option::Option<Self::Id> {
                self.#root_field_ident.clone()
            }

            fn lft(&self) -> i64 {
                self.#left_field_ident
            }

            fn rgt(&self) -> i64 {
                self.#right_field_ident
            }

            fn level(&self) -> i32 {
                self.#level_field_ident
            }

            fn id_to_value(id: &Self::Id) -> ::sea_orm::Value {
                ::sea_orm::Value::from(id.clone())
            }

            fn build_node(
                structure_id: Self::Id,
                element_id: Self::Id,
                root: ::core::option::Option<Self::Id>,
                bounds: ::nested_set::Bounds,
            ) -> Self::ActiveModel {
                #[allow(clippy::needless_update)]
                {
                    ActiveModel {
                        #structure_field_ident: ::sea_orm::ActiveValue::Set(structure_id),
                        #element_field_ident: ::sea_orm::ActiveValue::Set(element_id),
                        #root_field_ident: ::sea_orm::ActiveValue::Set(root),
                        #left_field_ident: ::sea_orm::ActiveValue::Set(bounds.lft),
                        #right_field_ident: ::sea_orm::ActiveValue::Set(bounds.rgt),
                        #level_field_ident: ::sea_orm::ActiveValue::Set(bounds.level),
                        ..::core::default::Default::default()
                    }
                }
            }

            fn id_column() -> <Self::Entity as ::sea_orm::EntityTrait>::Column {
                Column::#id_column_variant
            }

            fn structure_column() -> <Self::Entity as ::sea_orm::EntityTrait>::Column {
                Column::#structure_column_variant
            }

            fn element_column() -> <Self::Entity as ::sea_orm::EntityTrait>::Column {
                Column::#element_column_variant
            }

            fn root_column() -> <Self::Entity as ::sea_orm::EntityTrait>::Column {
                Column::#root_column_variant
            }

            fn left_column() -> <Self::Entity as ::sea_orm::EntityTrait>::Column {
                Column::#left_column_variant
            }

            fn right_column() -> <Self::Entity as ::sea_orm::EntityTrait>::Column {
                Column::#right_column_variant
            }

            fn level_column() -> <Self::Entity as ::sea_orm::EntityTrait>::Column {
                Column::#level_column_variant
            }

            fn structure_id_column() -> <Self::StructureEntity as ::sea_orm::EntityTrait>::Column {
                #structure_module_path::Column::#structure_id_column_variant
            }

            fn structure_model_id(model: &Self::StructureModel) -> Self::Id {
                model.#structure_id_field_ident.clone()
            }

            fn structure_max_levels(model: &Self::StructureModel) -> ::core::option::Option<i32> {
                model.#max_levels_field_ident
            }

            fn structure_build_row(
                max_levels: ::core::option::Option<i32>,
            ) -> Self::StructureActiveModel {
                #[allow(clippy::needless_update)]
                {
                    #structure_module_path::ActiveModel {
                        #max_levels_field_ident: ::sea_orm::ActiveValue::Set(max_levels),
                        ..::core::default::Default::default()
                    }
                }
            }
        }
    };

    Ok(generated.into())
}

fn parse_nested_set_attr(attr: &Attribute, options: &mut Options) -> syn::Result<()> {
    attr.parse_nested_meta(|meta| {
        let ident = meta
            .path
            .get_ident()
            .ok_or_else(|| syn::Error::new(meta.path.span(), "Invalid option key"))?
            .to_string();

        match ident.as_str() {
            "id_field" => options.id_field = Some(lit_string(&meta)?),
            "structure_field" => options.structure_field = Some(lit_string(&meta)?),
            "element_field" => options.element_field = Some(lit_string(&meta)?),
            "root_field" => options.root_field = Some(lit_string(&meta)?),
            "left_field" => options.left_field = Some(lit_string(&meta)?),
            "right_field" => options.right_field = Some(lit_string(&meta)?),
            "level_field" => options.level_field = Some(lit_string(&meta)?),
            "structure_id_field" => options.structure_id_field = Some(lit_string(&meta)?),
            "max_levels_field" => options.max_levels_field = Some(lit_string(&meta)?),
            "table_name" => options.table_name = Some(lit_string(&meta)?),
            "entity_name" => options.entity_name = Some(lit_string(&meta)?),
            "lock_namespace" => options.lock_namespace = Some(lit_string(&meta)?),
            "structure_module" => {
                let value: syn::LitStr = meta.value()?.parse()?;
                options.structure_module = Some(parse_path(&value.value(), value.span())?);
            }
            "advisory_locks" => {
                let value: syn::LitBool = meta.value()?.parse()?;
                options.advisory_locks = Some(value.value);
            }
            "lock_timeout_ms" => {
                let value: syn::LitInt = meta.value()?.parse()?;
                options.lock_timeout_ms = Some(value.base10_parse()?);
            }
            "id_type" => {
                let ty: Type = meta.value()?.parse()?;
                options.id_type = Some(ty);
            }
            other => {
                return Err(syn::Error::new(
                    meta.path.span(),
                    format!("Unsupported nested_set option `{other}`"),
                ));
            }
        }

        Ok(())
    })
}

fn lit_string(meta: &syn::meta::ParseNestedMeta<'_>) -> syn::Result<String> {
    let value: syn::LitStr = meta.value()?.parse()?;
    Ok(value.value())
}

fn parse_sea_orm_table_name(attr: &Attribute) -> syn::Result<Option<String>> {
    let mut table_name: Option<String> = None;
    attr.parse_nested_meta(|meta| {
        if meta.path.is_ident("table_name") {
            let value: syn::LitStr = meta.value()?.parse()?;
            table_name = Some(value.value());
        } else if meta.input.peek(syn::Token![=]) {
            // Skip the value of other `key = value` options.
            let _: syn::Expr = meta.value()?.parse()?;
        }
        Ok(())
    })?;
    Ok(table_name)
}

fn parse_path(value: &str, span: proc_macro2::Span) -> syn::Result<Path> {
    syn::parse_str::<Path>(value).map_err(|_| syn::Error::new(span, "Invalid path"))
}

fn to_pascal_case(value: &str) -> String {
    value
        .split('_')
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            let mut chars = segment.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}
